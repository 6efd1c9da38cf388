use std::sync::Arc;

use crate::ports::submission_log::{DeadLetter, LogEntry};
use crate::ports::submissions::{InsertOutcome, SubmissionRepository};
use crate::submissions::{SubmissionEnvelope, SubmissionRecord};
use crate::util::now_ms;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    Persisted { form_id: u64, outcome: InsertOutcome },
    /// The entry has no payload or the payload is not an envelope.
    Malformed(String),
    PersistFailed(String),
}

impl EntryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persisted {
                outcome: InsertOutcome::Inserted,
                ..
            } => "persisted",
            Self::Persisted {
                outcome: InsertOutcome::Duplicate,
                ..
            } => "duplicate",
            Self::Malformed(_) => "malformed",
            Self::PersistFailed(_) => "persist_failed",
        }
    }
}

/// What the consumer does with an entry after processing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave it in the pending set; a later claim cycle redelivers it.
    LeavePending,
    DeadLetter(DeadLetter),
}

/// Decodes log entries and persists them as submission records.
#[derive(Clone)]
pub struct SubmissionIngestor {
    repository: Arc<dyn SubmissionRepository>,
}

impl SubmissionIngestor {
    pub fn new(repository: Arc<dyn SubmissionRepository>) -> Self {
        Self { repository }
    }

    pub async fn process(&self, entry: &LogEntry) -> EntryOutcome {
        let Some(payload) = entry.payload.as_deref() else {
            return EntryOutcome::Malformed("entry has no payload field".into());
        };
        let envelope = match SubmissionEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => return EntryOutcome::Malformed(err.to_string()),
        };
        let form_id = envelope.form_id;
        let record = SubmissionRecord::from_envelope(entry.entry_id.clone(), envelope);
        match self.repository.insert(&record).await {
            Ok(outcome) => EntryOutcome::Persisted { form_id, outcome },
            Err(err) => EntryOutcome::PersistFailed(err.to_string()),
        }
    }
}

/// Successful entries are acknowledged. Failed ones stay pending until they
/// have been delivered `max_deliveries` times, then go to the dead-letter stream.
pub fn disposition(entry: &LogEntry, outcome: &EntryOutcome, max_deliveries: u64) -> Disposition {
    let reason = match outcome {
        EntryOutcome::Persisted { .. } => return Disposition::Ack,
        EntryOutcome::Malformed(reason) | EntryOutcome::PersistFailed(reason) => reason,
    };
    if entry.delivery_count < max_deliveries {
        return Disposition::LeavePending;
    }
    Disposition::DeadLetter(DeadLetter {
        source_id: entry.entry_id.clone(),
        payload: entry.payload.clone(),
        reason: format!("{}: {reason}", outcome.as_str()),
        delivery_count: entry.delivery_count,
        dead_lettered_at_ms: now_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainResult;
    use crate::error::DomainError;
    use crate::filter::Predicate;
    use crate::ports::BoxFuture;
    use serde_json::json;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct RecordingRepository {
        records: RwLock<Vec<SubmissionRecord>>,
        fail: bool,
    }

    impl SubmissionRepository for RecordingRepository {
        fn insert(&self, record: &SubmissionRecord) -> BoxFuture<'_, DomainResult<InsertOutcome>> {
            let record = record.clone();
            Box::pin(async move {
                if self.fail {
                    return Err(DomainError::Unavailable("store down".into()));
                }
                let mut records = self.records.write().await;
                if records.iter().any(|existing| existing.envelope_id == record.envelope_id) {
                    return Ok(InsertOutcome::Duplicate);
                }
                records.push(record);
                Ok(InsertOutcome::Inserted)
            })
        }

        fn find_by_form(&self, _form_id: u64) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
            Box::pin(async move { Ok(self.records.read().await.clone()) })
        }

        fn find_matching(
            &self,
            _predicate: &Predicate,
        ) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
            Box::pin(async move { Ok(self.records.read().await.clone()) })
        }
    }

    fn entry(payload: Option<&str>, delivery_count: u64) -> LogEntry {
        LogEntry {
            entry_id: "1700000000000-0".to_string(),
            payload: payload.map(str::to_string),
            delivery_count,
        }
    }

    fn valid_payload() -> String {
        json!({
            "form_id": 5,
            "answers": {"q1": "a"},
            "client_ip": "127.0.0.1",
            "user_agent": "test",
            "submitted_at": "2025-02-17T00:00:00Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn valid_entry_is_persisted_once_per_envelope_id() {
        let repository = Arc::new(RecordingRepository::default());
        let ingestor = SubmissionIngestor::new(repository.clone());
        let payload = valid_payload();

        let first = ingestor.process(&entry(Some(&payload), 1)).await;
        let second = ingestor.process(&entry(Some(&payload), 2)).await;
        assert_eq!(
            first,
            EntryOutcome::Persisted {
                form_id: 5,
                outcome: InsertOutcome::Inserted
            }
        );
        assert_eq!(second.as_str(), "duplicate");
        let records = repository.records.read().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].envelope_id, "1700000000000-0");
        assert_eq!(records[0].created_at_ms, 1_739_750_400_000);
    }

    #[tokio::test]
    async fn missing_or_garbled_payload_is_malformed() {
        let ingestor = SubmissionIngestor::new(Arc::new(RecordingRepository::default()));
        assert_eq!(ingestor.process(&entry(None, 1)).await.as_str(), "malformed");
        assert_eq!(
            ingestor.process(&entry(Some("{not json"), 1)).await.as_str(),
            "malformed"
        );
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let repository = RecordingRepository {
            fail: true,
            ..Default::default()
        };
        let ingestor = SubmissionIngestor::new(Arc::new(repository));
        let outcome = ingestor.process(&entry(Some(&valid_payload()), 1)).await;
        assert!(matches!(outcome, EntryOutcome::PersistFailed(reason) if reason.contains("store down")));
    }

    #[test]
    fn failures_stay_pending_until_the_delivery_cap() {
        let failed = EntryOutcome::PersistFailed("timeout".into());
        assert_eq!(
            disposition(&entry(Some("x"), 4), &failed, 5),
            Disposition::LeavePending
        );
        let Disposition::DeadLetter(letter) = disposition(&entry(Some("x"), 5), &failed, 5) else {
            panic!("expected dead letter");
        };
        assert_eq!(letter.delivery_count, 5);
        assert_eq!(letter.reason, "persist_failed: timeout");
        assert_eq!(letter.payload.as_deref(), Some("x"));
    }

    #[test]
    fn persisted_entries_are_acknowledged_even_when_duplicate() {
        let outcome = EntryOutcome::Persisted {
            form_id: 1,
            outcome: InsertOutcome::Duplicate,
        };
        assert_eq!(disposition(&entry(Some("x"), 9), &outcome, 5), Disposition::Ack);
    }
}
