use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    Draft,
    Published,
    Closed,
}

impl FormStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Draft),
            2 => Some(Self::Published),
            3 => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Draft => 1,
            Self::Published => 2,
            Self::Closed => 3,
        }
    }

    pub fn accepts_submissions(&self) -> bool {
        matches!(self, Self::Published)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    Judgment,
    TextInput,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleChoice => "single_choice",
            Self::MultiChoice => "multi_choice",
            Self::Judgment => "judgment",
            Self::TextInput => "text_input",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub title: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// The user-authored schema of a form. Read-only for every operation here.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormDefinition {
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl FormDefinition {
    pub fn parse(document: &serde_json::Value) -> DomainResult<Self> {
        serde_json::from_value(document.clone())
            .map_err(|err| DomainError::Validation(format!("invalid form definition: {err}")))
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions
            .iter()
            .find(|question| question.id == question_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Form {
    pub form_id: u64,
    pub form_key: String,
    pub creator_id: u64,
    pub title: String,
    pub status: FormStatus,
    pub definition: FormDefinition,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Form {
    pub fn is_owned_by(&self, actor_id: u64) -> bool {
        self.creator_id == actor_id
    }
}
