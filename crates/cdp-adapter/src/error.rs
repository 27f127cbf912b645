use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("operation timed out")]
    Timeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target not found")]
    TargetNotFound,
    #[error("script raised an exception")]
    ScriptException,
    #[error("internal error")]
    Internal,
}

/// Error plus the context needed to decide whether to retry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_target_gone(&self) -> bool {
        self.kind == AdapterErrorKind::TargetNotFound
            || self
                .hint
                .as_deref()
                .map(|hint| hint.contains("No target with given id") || hint.contains("Session with given id not found"))
                .unwrap_or(false)
    }
}
