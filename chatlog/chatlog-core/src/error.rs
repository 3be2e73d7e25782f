//! Error types shared by every component of the history engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("History buffer is not ready: {0}")]
    NotReady(String),
    #[error("Undefined wildcard `{{{name}}}` in preamble template")]
    UndefinedWildcard { name: String },
    #[error("Invalid wildcard registration: {0}")]
    Validation(String),
    #[error("Invalid snapshot field `{field}`: {reason}")]
    Schema { field: String, reason: String },
    #[error("Invalid message role `{0}`, expected one of user, assistant, system")]
    InvalidRole(String),
    #[error("Completion request failed: {0}")]
    Completion(String),
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl HistoryError {
    pub(crate) fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
