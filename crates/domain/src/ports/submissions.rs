use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::filter::Predicate;
use crate::ports::BoxFuture;
use crate::submissions::SubmissionRecord;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    /// A record for the same envelope id already exists; nothing was written.
    Duplicate,
}

/// Durable storage for submission records.
///
/// `insert` must be idempotent per `envelope_id`: the broker delivers at
/// least once, so the same envelope can arrive after it was persisted.
pub trait SubmissionRepository: Send + Sync {
    fn insert(&self, record: &SubmissionRecord) -> BoxFuture<'_, DomainResult<InsertOutcome>>;

    /// All records of a form, ascending by `created_at_ms`.
    fn find_by_form(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>>;

    /// Records matching a compiled predicate, ascending by `created_at_ms`.
    fn find_matching(
        &self,
        predicate: &Predicate,
    ) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>>;
}
