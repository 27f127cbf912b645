//! Envelopes exchanged between the orchestrator and a page agent.
//!
//! Requests travel as `{type, payload, timestamp}`, answers as `{type, payload}`.
//! Correlation is implicit: every request carries its own one-shot reply slot.

use serde::{Deserialize, Serialize};

use crate::now_millis;

/// Requests older than this are refused instead of replayed.
pub const STALE_REQUEST_MS: i64 = 60_000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    #[default]
    Idle,
    Busy,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    pub content: String,
    #[serde(rename = "mediaUrls", default)]
    pub media_urls: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentRequest {
    Ping,
    PostRequest(PostPayload),
    DebugInspect,
}

impl AgentRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRequest::Ping => "Ping",
            AgentRequest::PostRequest(_) => "PostRequest",
            AgentRequest::DebugInspect => "DebugInspect",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(flatten)]
    pub request: AgentRequest,
    pub timestamp: i64,
}

impl RequestEnvelope {
    pub fn new(request: AgentRequest) -> Self {
        Self {
            request,
            timestamp: now_millis(),
        }
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp > STALE_REQUEST_MS
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    /// Bridge script present in the document.
    pub ready: bool,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Observable side effect that confirmed a click.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SuccessSignal {
    SurfaceGone,
    ControlGone,
    SuccessIndicator,
    ControlBusy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SubmitVerdict {
    Confirmed(SuccessSignal),
    /// Click budget ran out while the control was still on screen.
    Unverified,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PostStage {
    Preflight,
    Compose,
    Content,
    Media,
    Submit,
    Finished,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub label: String,
    pub score: i32,
}

/// Snapshot attached to heuristic misses so thresholds can be tuned later.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub dialogs: usize,
    pub editables: usize,
    pub buttons: usize,
    #[serde(default)]
    pub near_misses: Vec<NearMiss>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaSummary {
    pub requested: usize,
    pub attached: usize,
    /// GIFs appended to the text as links.
    pub linked: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl MediaSummary {
    pub fn failed(&self) -> usize {
        self.requested.saturating_sub(self.attached + self.linked)
    }

    /// Nothing was asked for, or at least one item made it into the post.
    pub fn is_usable(&self) -> bool {
        self.requested == 0 || self.attached + self.linked > 0
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostReport {
    pub success: bool,
    pub stage: PostStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<SubmitVerdict>,
    #[serde(default)]
    pub media: MediaSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl PostReport {
    pub fn failed(stage: PostStage, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stage,
            verdict: None,
            media: MediaSummary::default(),
            message: Some(message.into()),
            diagnostic: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.verdict, Some(SubmitVerdict::Confirmed(_)))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub label: String,
    pub score: i32,
    pub role: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub url: Option<String>,
    pub state: AgentState,
    pub diagnostic: Diagnostic,
    pub compose_candidates: Vec<CandidateSummary>,
    pub submit_candidates: Vec<CandidateSummary>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    AlreadyInProgress,
    Stale,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentResponse {
    Pong(Pong),
    PostResult(PostReport),
    Inspection(Inspection),
    Rejected(Rejection),
    Error { message: String },
}

impl AgentResponse {
    pub fn already_in_progress() -> Self {
        AgentResponse::Rejected(Rejection {
            reason: RejectReason::AlreadyInProgress,
            message: "post already in progress".to_string(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentResponse::Error {
            message: message.into(),
        }
    }
}
