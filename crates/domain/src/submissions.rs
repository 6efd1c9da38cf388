use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;

/// One answer as it appears in a submission payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerValue {
    /// single_choice, judgment (option id) and text_input (free text).
    Text(String),
    /// multi_choice option ids, in the order the respondent picked them.
    Choices(Vec<String>),
}

impl AnswerValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Self::Choices),
            _ => None,
        }
    }

    /// Read-path variant: a list keeps its string elements and skips the rest.
    fn from_stored_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Choices(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            )),
            other => Self::from_json(other),
        }
    }
}

pub type Answers = BTreeMap<String, AnswerValue>;

/// Strict parse used on the write path: anything that is not a string or a
/// list of strings is rejected.
pub fn parse_answers(payload: &Value) -> DomainResult<Answers> {
    let object = payload
        .as_object()
        .ok_or_else(|| DomainError::Validation("answers must be an object".into()))?;
    object
        .iter()
        .map(|(question_id, value)| {
            AnswerValue::from_json(value)
                .map(|answer| (question_id.clone(), answer))
                .ok_or_else(|| {
                    DomainError::Validation(format!(
                        "answer for '{question_id}' must be a string or a list of strings"
                    ))
                })
        })
        .collect()
}

/// Lenient decode used on the read path. Only a non-object payload fails;
/// individual entries of an unexpected shape are dropped, and non-string
/// elements of a list are skipped.
pub fn decode_answers(payload: &Value) -> DomainResult<Answers> {
    let object = payload.as_object().ok_or_else(|| {
        DomainError::Validation("stored answers payload is not an object".into())
    })?;
    Ok(object
        .iter()
        .filter_map(|(question_id, value)| {
            AnswerValue::from_stored_json(value).map(|answer| (question_id.clone(), answer))
        })
        .collect())
}

/// The message that travels from the producer to the consumers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubmissionEnvelope {
    pub form_id: u64,
    pub answers: Answers,
    pub client_ip: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter_id: Option<u64>,
    #[serde(rename = "submitted_at", with = "crate::util::rfc3339_ms")]
    pub submitted_at_ms: i64,
}

impl SubmissionEnvelope {
    pub fn encode(&self) -> DomainResult<String> {
        serde_json::to_string(self)
            .map_err(|err| DomainError::Validation(format!("failed to encode envelope: {err}")))
    }

    pub fn decode(payload: &str) -> DomainResult<Self> {
        serde_json::from_str(payload)
            .map_err(|err| DomainError::Validation(format!("malformed envelope: {err}")))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub record_id: String,
    /// Broker id of the envelope this record was persisted from; unique per store.
    pub envelope_id: String,
    pub form_id: u64,
    pub submitter_id: Option<u64>,
    /// Raw answers document. Older payloads may not match the current definition.
    pub answers: Value,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at_ms: i64,
}

impl SubmissionRecord {
    pub fn from_envelope(envelope_id: impl Into<String>, envelope: SubmissionEnvelope) -> Self {
        let answers = Value::Object(
            envelope
                .answers
                .into_iter()
                .map(|(question_id, answer)| {
                    let value = match answer {
                        AnswerValue::Text(text) => Value::String(text),
                        AnswerValue::Choices(choices) => {
                            Value::Array(choices.into_iter().map(Value::String).collect())
                        }
                    };
                    (question_id, value)
                })
                .collect(),
        );
        Self {
            record_id: crate::util::uuid_v7_without_dashes(),
            envelope_id: envelope_id.into(),
            form_id: envelope.form_id,
            submitter_id: envelope.submitter_id,
            answers,
            client_ip: envelope.client_ip,
            user_agent: envelope.user_agent,
            created_at_ms: envelope.submitted_at_ms,
        }
    }

    pub fn decoded_answers(&self) -> DomainResult<Answers> {
        decode_answers(&self.answers)
    }

    /// The record as a stored document, the shape store-side queries run against.
    pub fn to_document(&self) -> Value {
        serde_json::json!({
            "record_id": self.record_id,
            "envelope_id": self.envelope_id,
            "form_id": self.form_id,
            "submitter_id": self.submitter_id,
            "answers": self.answers,
            "client_ip": self.client_ip,
            "user_agent": self.user_agent,
            "created_at_ms": self.created_at_ms,
        })
    }
}
