//! Clock port (spec.md §6)
//!
//! Monotonic time plus wall-clock timestamps, injectable so tests can
//! control the passage of time instead of racing real sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::domain_types::Timestamp;

/// Source of monotonic and wall-clock time for the runtime.
pub trait Clock: Send + Sync {
    /// Current wall-clock timestamp.
    fn now(&self) -> Timestamp;

    /// Current monotonic instant, used for interval measurement.
    fn monotonic_now(&self) -> Instant;
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(SystemTime::now())
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: `now()` advances only when told to.
///
/// Monotonic instants still come from the real OS clock since `Instant`
/// cannot be constructed arbitrarily; tests that need full control over
/// elapsed-time checks should instead assert against the wall-clock
/// timestamp returned by [`TestClock::now`].
pub struct TestClock {
    epoch_millis: AtomicU64,
}

impl TestClock {
    /// Creates a test clock starting at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_millis: AtomicU64::new(0),
        }
    }

    /// Advances the wall-clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.epoch_millis
            .fetch_add(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        let millis = self.epoch_millis.load(Ordering::SeqCst);
        Timestamp::new(SystemTime::UNIX_EPOCH + Duration::from_millis(millis))
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_on_demand() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(500));
        let t1 = clock.now();
        assert_eq!(t0.elapsed_ms_until(t1), 500);
    }
}
