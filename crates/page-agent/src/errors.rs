//! Error types for the page agent

use autopost_core_types::CoreError;
use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// The injected bridge is absent (document replaced, never injected).
    #[error("page bridge is not installed")]
    BridgeMissing,

    /// The tab behind the port was closed.
    #[error("target tab is gone: {0}")]
    TargetGone(String),

    #[error("page i/o failed: {0}")]
    Page(String),

    #[error("bridge returned malformed data: {0}")]
    Protocol(String),

    /// The agent task stopped before answering.
    #[error("agent is not running")]
    Disconnected,

    #[error("agent did not answer {request} within {timeout_ms}ms")]
    Timeout { request: &'static str, timeout_ms: u64 },
}

impl AgentError {
    /// Worth a re-injection attempt by the session layer.
    pub fn needs_reinject(&self) -> bool {
        matches!(
            self,
            AgentError::BridgeMissing | AgentError::Disconnected | AgentError::Timeout { .. }
        )
    }
}

impl From<AdapterError> for AgentError {
    fn from(err: AdapterError) -> Self {
        if err.is_target_gone() {
            AgentError::TargetGone(err.to_string())
        } else {
            AgentError::Page(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Protocol(err.to_string())
    }
}

impl From<AgentError> for CoreError {
    fn from(err: AgentError) -> Self {
        CoreError::new(err.to_string())
    }
}
