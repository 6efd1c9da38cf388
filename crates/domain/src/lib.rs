pub mod error;
pub mod filter;
pub mod forms;
pub mod ingestion;
pub mod ports;
pub mod producer;
pub mod query;
pub mod reporting;
pub mod stats;
pub mod submission_log;
pub mod submissions;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
