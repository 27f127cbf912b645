//! Page agent: finds the composer on a live page, fills it and publishes.
//!
//! The agent never touches the DOM directly. Everything goes through
//! [`PagePort`], implemented over CDP by [`CdpPagePort`] (which talks to the
//! injected bridge script) and in memory by `testing::FakePage`.

pub mod agent;
pub mod bridge;
pub mod cdp_port;
pub mod config;
pub mod errors;
pub mod inserter;
pub mod locator;
pub mod model;
pub mod ports;
pub mod resample;
pub mod scoring;
pub mod submit;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{AgentCell, AgentHandle, BusyGuard, Envelope, PageAgent};
pub use cdp_port::CdpPagePort;
pub use config::AgentConfig;
pub use errors::AgentError;
pub use locator::{is_rejected_url, ComposeLocator, LocateOutcome};
pub use model::{ElementSnapshot, NodeRef, Query, TextMode};
pub use ports::{media_channel, ChannelMediaSource, MediaRequest, MediaSource, PagePort};
pub use submit::{SubmitOutcome, SubmitResolver};
