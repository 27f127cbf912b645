//! Shared primitives for the autopost workspace.
//!
//! Jobs and their statuses, the orchestrator <-> page agent envelopes, and the
//! media payloads that cross between them all live here so every crate speaks
//! the same types.

mod error;
mod job;
mod media;
pub mod protocol;

pub use error::CoreError;
pub use job::{DueTime, Job, JobId, JobStatus, TriggerRecord, JOB_TIMER_PREFIX};
pub use media::{MediaAsset, MediaFailure, MediaFetchResult};

/// Milliseconds since the unix epoch, the timestamp unit used by envelopes and triggers.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
