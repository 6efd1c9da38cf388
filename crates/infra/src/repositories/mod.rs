mod forms;
mod submissions;

pub use forms::*;
pub use submissions::*;

use questflow_domain::error::DomainError;

pub(crate) fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let error_message = err.to_string().to_lowercase();
    if error_message.contains("already exists")
        || error_message.contains("duplicate")
        || error_message.contains("unique")
        || error_message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    if error_message.contains("connection") || error_message.contains("websocket") {
        return DomainError::Unavailable(error_message);
    }
    DomainError::Validation(format!("surreal query failed: {error_message}"))
}
