use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autopost_core_types::DueTime;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::clock::{delay_until, next_trigger, Clock, DAILY_PERIOD};
use crate::error::SchedulerError;
use crate::metrics;

/// Delivered on the registry channel each time a named timer elapses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimerFired {
    pub name: String,
    pub scheduled_for: NaiveDateTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TimerInfo {
    pub name: String,
    pub next_fire: NaiveDateTime,
    #[serde(with = "period_minutes")]
    pub period: Option<Duration>,
}

struct TimerEntry {
    generation: u64,
    next_fire: Arc<Mutex<NaiveDateTime>>,
    period: Option<Duration>,
    handle: JoinHandle<()>,
}

/// Named timers, one per name; re-creating a name replaces the old timer.
pub struct TimerRegistry {
    clock: Arc<dyn Clock>,
    entries: Arc<DashMap<String, TimerEntry>>,
    generation: AtomicU64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> (Arc<Self>, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                clock,
                entries: Arc::new(DashMap::new()),
                generation: AtomicU64::new(0),
                fired_tx,
            }),
            fired_rx,
        )
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Fires at the next occurrence of `due` and every day after.
    pub fn schedule_daily(&self, name: &str, due: DueTime) -> Result<NaiveDateTime, SchedulerError> {
        let first = next_trigger(due, self.clock.now());
        self.schedule_at(name, first, Some(DAILY_PERIOD))?;
        Ok(first)
    }

    /// Fires every `period`, first after one period has elapsed.
    pub fn schedule_interval(&self, name: &str, period: Duration) -> Result<NaiveDateTime, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidSchedule {
                name: name.to_string(),
                reason: "period must be positive".into(),
            });
        }
        let first = self.clock.now() + to_chrono(period);
        self.schedule_at(name, first, Some(period))?;
        Ok(first)
    }

    pub fn schedule_at(
        &self,
        name: &str,
        first: NaiveDateTime,
        period: Option<Duration>,
    ) -> Result<(), SchedulerError> {
        if self.fired_tx.is_closed() {
            return Err(SchedulerError::Stopped);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let next_fire = Arc::new(Mutex::new(first));
        let start = Instant::now() + delay_until(first, self.clock.now());
        let handle = tokio::spawn(run_timer(
            name.to_string(),
            generation,
            start,
            period,
            next_fire.clone(),
            self.fired_tx.clone(),
            self.entries.clone(),
        ));

        let entry = TimerEntry {
            generation,
            next_fire,
            period,
            handle,
        };
        if let Some(previous) = self.entries.insert(name.to_string(), entry) {
            previous.handle.abort();
            debug!(target: "scheduler", timer = name, "replaced existing timer");
        }
        info!(target: "scheduler", timer = name, first = %first, "timer scheduled");
        Ok(())
    }

    pub fn clear(&self, name: &str) -> bool {
        match self.entries.remove(name) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Removes every timer whose name starts with `prefix`; returns how many went.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        names.iter().filter(|name| self.clear(name)).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered by next fire time.
    pub fn list(&self) -> Vec<TimerInfo> {
        let mut timers: Vec<TimerInfo> = self
            .entries
            .iter()
            .map(|entry| TimerInfo {
                name: entry.key().clone(),
                next_fire: *entry.next_fire.lock(),
                period: entry.period,
            })
            .collect();
        timers.sort_by(|a, b| a.next_fire.cmp(&b.next_fire).then(a.name.cmp(&b.name)));
        timers
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.handle.abort();
        }
    }
}

async fn run_timer(
    name: String,
    generation: u64,
    start: Instant,
    period: Option<Duration>,
    next_fire: Arc<Mutex<NaiveDateTime>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
    entries: Arc<DashMap<String, TimerEntry>>,
) {
    match period {
        Some(period) => {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let scheduled_for = {
                    let mut guard = next_fire.lock();
                    let current = *guard;
                    *guard = current + to_chrono(period);
                    current
                };
                if !deliver(&fired_tx, &name, scheduled_for) {
                    break;
                }
            }
        }
        None => {
            sleep_until(start).await;
            let scheduled_for = *next_fire.lock();
            deliver(&fired_tx, &name, scheduled_for);
            entries.remove_if(&name, |_, entry| entry.generation == generation);
        }
    }
}

fn deliver(tx: &mpsc::UnboundedSender<TimerFired>, name: &str, scheduled_for: NaiveDateTime) -> bool {
    metrics::record_timer_fired();
    debug!(target: "scheduler", timer = name, %scheduled_for, "timer fired");
    tx.send(TimerFired {
        name: name.to_string(),
        scheduled_for,
    })
    .is_ok()
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

mod period_minutes {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(period) => serializer.serialize_some(&(period.as_secs() / 60)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn registry_at(now: NaiveDateTime) -> (Arc<TimerRegistry>, mpsc::UnboundedReceiver<TimerFired>) {
        TimerRegistry::new(Arc::new(FixedClock::new(now)))
    }

    #[tokio::test(start_paused = true)]
    async fn daily_timer_waits_for_due_time() {
        let (registry, mut rx) = registry_at(at(8, 59, 0));
        let started = Instant::now();
        let first = registry
            .schedule_daily("job_42", DueTime::parse("09:00").unwrap())
            .unwrap();
        assert_eq!(first, at(9, 0, 0));

        let fired = rx.recv().await.expect("timer fired");
        assert_eq!(fired.name, "job_42");
        assert_eq!(fired.scheduled_for, at(9, 0, 0));
        assert!(Instant::now() - started >= Duration::from_secs(60));

        let second = rx.recv().await.expect("timer repeats");
        assert_eq!(second.scheduled_for, at(9, 0, 0) + chrono::Duration::days(1));
        assert!(Instant::now() - started >= Duration::from_secs(60) + DAILY_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn due_now_fires_immediately() {
        let (registry, mut rx) = registry_at(at(9, 0, 0));
        registry
            .schedule_daily("job_42", DueTime::parse("09:00").unwrap())
            .unwrap();
        let fired = tokio::time::timeout(Duration::from_millis(10), rx.recv())
            .await
            .expect("fires without waiting")
            .unwrap();
        assert_eq!(fired.scheduled_for, at(9, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_a_name_keeps_one_timer() {
        let (registry, mut rx) = registry_at(at(7, 0, 0));
        registry
            .schedule_daily("job_1", DueTime::parse("08:00").unwrap())
            .unwrap();
        registry
            .schedule_daily("job_1", DueTime::parse("10:00").unwrap())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].next_fire, at(10, 0, 0));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.scheduled_for, at(10, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_prefix_leaves_other_timers() {
        let (registry, _rx) = registry_at(at(7, 0, 0));
        registry
            .schedule_daily("job_1", DueTime::parse("08:00").unwrap())
            .unwrap();
        registry
            .schedule_daily("job_2", DueTime::parse("08:00").unwrap())
            .unwrap();
        registry
            .schedule_interval("sync", Duration::from_secs(300))
            .unwrap();

        assert_eq!(registry.clear_prefix("job_"), 2);
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["sync".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_timer_removes_itself() {
        let (registry, mut rx) = registry_at(at(7, 0, 0));
        registry.schedule_at("once", at(7, 0, 5), None).unwrap();
        assert!(registry.contains("once"));
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.name, "once");
        tokio::task::yield_now().await;
        assert!(!registry.contains("once"));
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (registry, _rx) = registry_at(at(7, 0, 0));
        let err = registry.schedule_interval("sync", Duration::ZERO).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }
}
