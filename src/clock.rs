use std::sync::Mutex;

use time::OffsetDateTime;

/// Source of "now" for the engine.
///
/// Streak rules are calendar-dependent (working days, multi-day gaps), so
/// components never call `OffsetDateTime::now_utc()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A settable clock for tests and replay tooling.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut guard = self.now.lock().expect("clock lock");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fixed_clock_returns_what_was_set() {
        let clock = FixedClock::new(datetime!(2024-03-04 10:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-03-04 10:00 UTC));

        clock.set(datetime!(2024-03-05 10:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-03-05 10:00 UTC));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(datetime!(2024-03-04 10:00 UTC));
        clock.advance(time::Duration::days(1));
        assert_eq!(clock.now(), datetime!(2024-03-05 10:00 UTC));
    }
}
