use thiserror::Error;

/// Shared error type every crate can convert into.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("{message}")]
    Message { message: String },
    #[error("invalid due time '{0}', expected HH:MM")]
    InvalidDueTime(String),
    #[error("unknown job status '{0}'")]
    UnknownStatus(String),
}

impl CoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}
