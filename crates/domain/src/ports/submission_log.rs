use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum SubmissionLogError {
    #[error("submission log unavailable: {0}")]
    Unavailable(String),
    #[error("submission log serialization error: {0}")]
    Serialization(String),
    #[error("submission log operation failed: {0}")]
    Operation(String),
}

/// Where a newly created consumer group starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupStart {
    /// Replay everything already in the log that the group has not consumed.
    Beginning,
    /// Only entries appended after the group is created.
    Tail,
}

impl GroupStart {
    pub fn as_stream_id(&self) -> &'static str {
        match self {
            Self::Beginning => "0",
            Self::Tail => "$",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadBlock {
    NoWait,
    For(Duration),
    Forever,
}

impl ReadBlock {
    /// `0` means block until something arrives.
    pub fn from_millis(block_ms: u64) -> Self {
        if block_ms == 0 {
            Self::Forever
        } else {
            Self::For(Duration::from_millis(block_ms))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub entry_id: String,
    /// `None` when the entry carries no readable `payload` field.
    pub payload: Option<String>,
    /// How many times the entry has been handed to a consumer, this delivery included.
    pub delivery_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadLetter {
    pub source_id: String,
    pub payload: Option<String>,
    pub reason: String,
    pub delivery_count: u64,
    pub dead_lettered_at_ms: i64,
}

/// The durable log the ingestion pipeline runs on.
///
/// Implementations are bound to one stream; group and consumer names are
/// passed per call so several workers can share a handle.
pub trait SubmissionLog: Send + Sync {
    fn append(&self, payload: &str) -> BoxFuture<'_, Result<String, SubmissionLogError>>;

    /// Creates the group if missing. An existing group is not an error.
    fn ensure_group(
        &self,
        group: &str,
        start: GroupStart,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>>;

    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: ReadBlock,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, SubmissionLogError>>;

    /// Takes over entries that stayed unacknowledged for at least `min_idle`.
    fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, SubmissionLogError>>;

    fn ack(&self, group: &str, entry_id: &str) -> BoxFuture<'_, Result<(), SubmissionLogError>>;

    /// Copies the entry to the dead-letter stream, then acknowledges it on the source.
    fn dead_letter(
        &self,
        group: &str,
        letter: &DeadLetter,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>>;
}
