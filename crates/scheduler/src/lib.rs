//! Timers and locking for scheduled posts.
//!
//! Every pending job with a due time owns one daily timer named `job_<id>`;
//! a separate interval timer drives re-sync. Fired timers are delivered on a
//! channel so the owner decides what to run, and the [`ProcessingLock`]
//! keeps two firings of the same job from overlapping.

pub mod clock;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod timers;

pub use clock::{next_trigger, Clock, FixedClock, SystemClock, DAILY_PERIOD};
pub use error::SchedulerError;
pub use lock::{ProcessingGuard, ProcessingLock};
pub use timers::{TimerFired, TimerInfo, TimerRegistry};
