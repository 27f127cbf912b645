//! autopost library
//!
//! Schedules spreadsheet rows as posts and publishes them through a page
//! agent attached to a logged-in browser tab. Exposed as a library for the
//! binary and the integration tests.

pub mod cli;
pub mod config;
pub mod errors;
pub mod media;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod sheet;

pub use config::AppConfig;
pub use orchestrator::{JobOutcome, JobRun, Orchestrator, ResyncSummary, ScheduleSwitch};
pub use services::Services;
