//! Time injection for the orchestration code
//!
//! Every wait in the connection lifecycle goes through [`Clock`] so tests can
//! drive the sequencing with a fake clock instead of real sleeps.

use std::time::{Duration, Instant};

/// Monotonic time source with blocking sleep
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `std::thread::sleep`
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll `ready` until it returns true or `timeout` elapses.
///
/// The predicate is always evaluated at least once, so a zero timeout still
/// performs a single check. Returns whether the predicate ever succeeded.
pub fn wait_until_ready<F>(
    clock: &dyn Clock,
    mut ready: F,
    timeout: Duration,
    poll_interval: Duration,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = clock.now() + timeout;
    loop {
        if ready() {
            return true;
        }
        if clock.now() >= deadline {
            return false;
        }
        clock.sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClock;

    #[test]
    fn test_ready_immediately_returns_without_sleeping() {
        let clock = FakeClock::new();
        let ok = wait_until_ready(&clock, || true, Duration::from_secs(10), Duration::from_secs(1));
        assert!(ok);
        assert!(clock.slept().is_empty());
    }

    #[test]
    fn test_times_out_when_never_ready() {
        let clock = FakeClock::new();
        let mut polls = 0;
        let ok = wait_until_ready(
            &clock,
            || {
                polls += 1;
                false
            },
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        assert!(!ok);
        // 10s window polled every 2s: first check plus five more after sleeps
        assert_eq!(polls, 6);
        assert_eq!(clock.slept().len(), 5);
    }

    #[test]
    fn test_succeeds_partway_through_window() {
        let clock = FakeClock::new();
        let mut polls = 0;
        let ok = wait_until_ready(
            &clock,
            || {
                polls += 1;
                polls == 3
            },
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        assert!(ok);
        assert_eq!(polls, 3);
        assert_eq!(clock.slept().len(), 2);
    }

    #[test]
    fn test_zero_timeout_still_checks_once() {
        let clock = FakeClock::new();
        let mut polls = 0;
        let ok = wait_until_ready(
            &clock,
            || {
                polls += 1;
                false
            },
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert!(!ok);
        assert_eq!(polls, 1);
    }
}
