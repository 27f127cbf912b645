//! Job persistence.
//!
//! [`JobStore`] is the process-local source of truth; [`RemoteMirror`] is the
//! shared copy other tools read and the channel through which immediate
//! triggers arrive.

pub mod error;
pub mod mirror;
pub mod store;
pub mod triggers;

pub use error::{MirrorError, StoreError};
pub use mirror::{MemoryMirror, NullMirror, RemoteMirror, RestMirror, RestMirrorConfig};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use triggers::{PendingTrigger, TriggerPoller};
