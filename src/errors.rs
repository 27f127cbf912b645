//! Error types for the orchestrator side.

use autopost_core_types::CoreError;
use autopost_page_agent::AgentError;
use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unsupported media url '{0}'")]
    InvalidUrl(String),
    #[error("media request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("media host answered http {0}")]
    Http(u16),
    #[error("media body is empty")]
    Empty,
    #[error("media is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

impl MediaError {
    /// Timeouts, connection failures, 5xx and 429 are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            MediaError::Http(status) => *status >= 500 || *status == 429,
            MediaError::InvalidUrl(_) | MediaError::Empty | MediaError::TooLarge { .. } => false,
        }
    }
}

/// A ready page agent could not be obtained; the job is marked failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser is unavailable: {0}")]
    Browser(#[from] AdapterError),
    #[error("page agent did not become ready after {attempts} attempts: {last}")]
    NotReady { attempts: u32, last: String },
    #[error("page agent failed: {0}")]
    Agent(#[from] AgentError),
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sheet answered http {0}")]
    Http(u16),
    #[error("sheet is not valid csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("no sheet url configured")]
    NotConfigured,
}

impl From<MediaError> for CoreError {
    fn from(value: MediaError) -> Self {
        CoreError::new(value.to_string())
    }
}

impl From<SessionError> for CoreError {
    fn from(value: SessionError) -> Self {
        CoreError::new(value.to_string())
    }
}

impl From<SheetError> for CoreError {
    fn from(value: SheetError) -> Self {
        CoreError::new(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_error_classification() {
        assert!(MediaError::Http(503).is_transient());
        assert!(MediaError::Http(429).is_transient());
        assert!(!MediaError::Http(404).is_transient());
        assert!(!MediaError::Empty.is_transient());
        assert!(!MediaError::TooLarge { size: 10, limit: 5 }.is_transient());
    }
}
