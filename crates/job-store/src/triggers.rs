use std::collections::HashSet;
use std::sync::Arc;

use autopost_core_types::TriggerRecord;
use tracing::debug;

use crate::error::MirrorError;
use crate::mirror::RemoteMirror;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingTrigger {
    pub key: String,
    pub record: TriggerRecord,
}

/// Turns the trigger node into a stream of additions.
///
/// Each key is handed out once per process unless it is [`forget`]ten, in
/// which case the next poll reports it again if the record still exists.
///
/// [`forget`]: TriggerPoller::forget
pub struct TriggerPoller {
    mirror: Arc<dyn RemoteMirror>,
    seen: HashSet<String>,
}

impl TriggerPoller {
    pub fn new(mirror: Arc<dyn RemoteMirror>) -> Self {
        Self {
            mirror,
            seen: HashSet::new(),
        }
    }

    pub async fn poll(&mut self) -> Result<Vec<PendingTrigger>, MirrorError> {
        let mut fresh = Vec::new();
        for (key, record) in self.mirror.list_triggers().await? {
            if self.seen.insert(key.clone()) {
                debug!(target: "triggers", key, row_id = %record.row_id, "new trigger");
                fresh.push(PendingTrigger { key, record });
            }
        }
        Ok(fresh)
    }

    /// Hands `key` out again on the next poll.
    pub fn forget(&mut self, key: &str) -> bool {
        self.seen.remove(key)
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}
