//! Injected wall-clock time source.
//!
//! Admission decisions depend on the local time of day, so every component
//! that reads "now" does it through a [`Clock`]. Production code uses
//! [`SystemClock`]; tests drive a [`ManualClock`].

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use parking_lot::Mutex;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;

    /// Current time as epoch milliseconds (wall time interpreted as UTC).
    fn now_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }
}

/// The device's local clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(at(7, 0));
        assert_eq!(clock.now(), at(7, 0));

        clock.advance(ChronoDuration::minutes(20));
        assert_eq!(clock.now(), at(7, 20));

        clock.set(at(12, 0));
        assert_eq!(clock.now(), at(12, 0));
    }

    #[test]
    fn test_now_millis_is_monotonic_with_wall_time() {
        let clock = ManualClock::new(at(7, 0));
        let before = clock.now_millis();
        clock.advance(ChronoDuration::seconds(1));
        assert_eq!(clock.now_millis() - before, 1000);
    }
}
