use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;
use crate::forms::Form;
use crate::ports::submission_log::{SubmissionLog, SubmissionLogError};
use crate::submissions::{SubmissionEnvelope, parse_answers};
use crate::util::now_ms;

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub append_attempts: u32,
    pub append_backoff: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            append_attempts: 3,
            append_backoff: Duration::from_millis(100),
        }
    }
}

/// Request metadata captured by the transport layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub client_ip: String,
    pub user_agent: String,
}

/// Write side of the ingestion pipeline. Validates a submission, appends its
/// envelope to the log and returns the log id without waiting for persistence.
#[derive(Clone)]
pub struct SubmissionProducer {
    log: Arc<dyn SubmissionLog>,
    config: ProducerConfig,
}

impl SubmissionProducer {
    pub fn new(log: Arc<dyn SubmissionLog>, config: ProducerConfig) -> Self {
        Self { log, config }
    }

    pub async fn enqueue(
        &self,
        form: &Form,
        answers: &Value,
        client: ClientContext,
        submitter_id: Option<u64>,
    ) -> DomainResult<String> {
        if !form.status.accepts_submissions() {
            return Err(DomainError::FormNotPublished(form.form_id));
        }
        let envelope = SubmissionEnvelope {
            form_id: form.form_id,
            answers: parse_answers(answers)?,
            client_ip: client.client_ip,
            user_agent: client.user_agent,
            submitter_id,
            submitted_at_ms: now_ms(),
        };
        let payload = envelope.encode()?;
        let entry_id = self.append_with_retry(&payload).await?;
        tracing::debug!(form_id = form.form_id, entry_id = %entry_id, "submission enqueued");
        Ok(entry_id)
    }

    async fn append_with_retry(&self, payload: &str) -> DomainResult<String> {
        let attempts = self.config.append_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.log.append(payload).await {
                Ok(entry_id) => return Ok(entry_id),
                Err(SubmissionLogError::Serialization(message)) => {
                    return Err(DomainError::Validation(message));
                }
                Err(err) if attempt < attempts => {
                    tracing::warn!(attempt, error = %err, "submission append failed, retrying");
                    tokio::time::sleep(self.config.append_backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "submission append failed");
                    return Err(DomainError::Unavailable(err.to_string()));
                }
            }
        }
    }
}
