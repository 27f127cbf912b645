use std::time::Duration;

use autopost_core_types::DueTime;
use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

/// 1,440 minutes.
pub const DAILY_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to a given instant until moved with [`FixedClock::set`].
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.0.lock() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock()
    }
}

/// Next occurrence of `due` at or after `now`: today if not yet past, tomorrow otherwise.
///
/// A due time equal to `now` fires immediately.
pub fn next_trigger(due: DueTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(due.as_naive_time());
    if today < now {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

/// Wall-clock gap between two instants, zero when `at` already passed.
pub fn delay_until(at: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn later_today_stays_today() {
        let due = DueTime::parse("18:30").unwrap();
        assert_eq!(next_trigger(due, at(9, 0, 0)), at(18, 30, 0));
    }

    #[test]
    fn exact_match_fires_now() {
        let due = DueTime::parse("09:00").unwrap();
        assert_eq!(next_trigger(due, at(9, 0, 0)), at(9, 0, 0));
    }

    #[test]
    fn past_rolls_to_tomorrow() {
        let due = DueTime::parse("09:00").unwrap();
        let next = next_trigger(due, at(9, 0, 1));
        assert_eq!(next, at(9, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn trigger_is_never_in_the_past() {
        for hour in 0..24 {
            for minute in [0, 17, 59] {
                let due = DueTime::new(hour, minute).unwrap();
                for now in [at(0, 0, 0), at(9, 0, 0), at(12, 34, 56), at(23, 59, 59)] {
                    let next = next_trigger(due, now);
                    assert!(next >= now);
                    assert!(next - now < chrono::Duration::days(1));
                }
            }
        }
    }

    #[test]
    fn delay_clamps_at_zero() {
        assert_eq!(delay_until(at(8, 0, 0), at(9, 0, 0)), Duration::ZERO);
        assert_eq!(delay_until(at(9, 1, 0), at(9, 0, 0)), Duration::from_secs(60));
    }
}
