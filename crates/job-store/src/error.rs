use std::path::PathBuf;

use autopost_core_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job store contents are not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("job store write task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(value: StoreError) -> Self {
        CoreError::new(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("mirror request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mirror payload could not be decoded: {0}")]
    Decode(String),
    #[error("invalid mirror url: {0}")]
    InvalidUrl(String),
}

impl MirrorError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            MirrorError::Http { status, .. } => *status >= 500 || *status == 429,
            MirrorError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            MirrorError::Decode(_) | MirrorError::InvalidUrl(_) => false,
        }
    }
}

impl From<MirrorError> for CoreError {
    fn from(value: MirrorError) -> Self {
        CoreError::new(value.to_string())
    }
}
