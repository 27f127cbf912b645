use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    timers_fired: AtomicU64,
    lock_contended: AtomicU64,
    started: AtomicU64,
    skipped: AtomicU64,
    done: AtomicU64,
    unverified: AtomicU64,
    failed: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_timer_fired() {
    increment(&COUNTERS.timers_fired);
}

pub fn record_lock_contended() {
    increment(&COUNTERS.lock_contended);
}

pub fn record_started() {
    increment(&COUNTERS.started);
}

pub fn record_skipped() {
    increment(&COUNTERS.skipped);
}

pub fn record_done() {
    increment(&COUNTERS.done);
}

pub fn record_unverified() {
    increment(&COUNTERS.unverified);
}

pub fn record_failed() {
    increment(&COUNTERS.failed);
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub timers_fired: u64,
    pub lock_contended: u64,
    pub started: u64,
    pub skipped: u64,
    pub done: u64,
    pub unverified: u64,
    pub failed: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        timers_fired: COUNTERS.timers_fired.load(Ordering::Relaxed),
        lock_contended: COUNTERS.lock_contended.load(Ordering::Relaxed),
        started: COUNTERS.started.load(Ordering::Relaxed),
        skipped: COUNTERS.skipped.load(Ordering::Relaxed),
        done: COUNTERS.done.load(Ordering::Relaxed),
        unverified: COUNTERS.unverified.load(Ordering::Relaxed),
        failed: COUNTERS.failed.load(Ordering::Relaxed),
    }
}
