//! Clock abstraction for time-dependent components.
//!
//! All counters, bans, and quotas are driven by wall-clock time so that the
//! in-process and shared backends agree on a single representation. Components
//! take an `Arc<dyn Clock>` so tests can substitute [`ManualClock`] and step
//! time deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests.
///
/// Starts at the instant it is created and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock pinned to the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Advance the clock by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::starting_now();
        let t1 = clock.now();
        assert_eq!(clock.now(), t1);

        clock.advance_secs(60);
        assert_eq!(clock.now(), t1 + Duration::seconds(60));
    }
}
