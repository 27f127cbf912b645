use std::collections::HashSet;
use std::sync::Arc;

use autopost_core_types::JobId;
use parking_lot::Mutex;
use tracing::debug;

use crate::metrics;

/// Set of job ids currently being executed by this process.
///
/// Acquisition never waits: a held id yields `None` and the caller backs off.
#[derive(Clone, Debug, Default)]
pub struct ProcessingLock {
    held: Arc<Mutex<HashSet<JobId>>>,
}

impl ProcessingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, id: &JobId) -> Option<ProcessingGuard> {
        let inserted = self.held.lock().insert(id.clone());
        if !inserted {
            metrics::record_lock_contended();
            debug!(target: "scheduler", job_id = %id, "processing lock already held");
            return None;
        }
        Some(ProcessingGuard {
            lock: self.clone(),
            id: id.clone(),
        })
    }

    pub fn is_held(&self, id: &JobId) -> bool {
        self.held.lock().contains(id)
    }

    pub fn held(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.held.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn release(&self, id: &JobId) {
        self.held.lock().remove(id);
    }
}

/// Holds a job id in the [`ProcessingLock`] until dropped, including on unwind.
#[derive(Debug)]
pub struct ProcessingGuard {
    lock: ProcessingLock,
    id: JobId,
}

impl ProcessingGuard {
    pub fn job_id(&self) -> &JobId {
        &self.id
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.lock.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = ProcessingLock::new();
        let id = JobId::new("42");
        let guard = lock.acquire(&id).expect("first acquire");
        assert!(lock.acquire(&id).is_none());
        assert!(lock.acquire(&JobId::new("43")).is_some());
        drop(guard);
        assert!(!lock.is_held(&id));
        assert!(lock.acquire(&id).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_has_one_winner() {
        for _ in 0..50 {
            let lock = ProcessingLock::new();
            let winners = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));
            let mut handles = Vec::new();
            for _ in 0..2 {
                let lock = lock.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                handles.push(tokio::spawn(async move {
                    barrier.wait().await;
                    let guard = lock.acquire(&JobId::new("same"));
                    if guard.is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // keep the guard alive until both sides attempted
                    barrier.wait().await;
                    drop(guard);
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn released_when_holder_panics() {
        let lock = ProcessingLock::new();
        let id = JobId::new("boom");
        let task_lock = lock.clone();
        let task_id = id.clone();
        let result = tokio::spawn(async move {
            let _guard = task_lock.acquire(&task_id).unwrap();
            panic!("page work exploded");
        })
        .await;
        assert!(result.is_err());
        assert!(!lock.is_held(&id));
    }
}
