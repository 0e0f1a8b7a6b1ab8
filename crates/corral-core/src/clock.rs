//! Clock abstraction for lease expiry evaluation.
//!
//! Every expiry decision in the kernel is a lazy computation over "now"
//! (`now >= staked_at + ttl`); there is no background reaper and no mutable
//! clock-driven state. Injecting the clock keeps that computation
//! deterministic under test: expiry tests advance a [`ManualClock`] instead
//! of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Trait for clock implementations.
///
/// All kernel components take `&dyn Clock` (or a generic bound) rather than
/// reading `SystemTime` directly, so expiration logic can be tested
/// deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now_secs(&self) -> u64;
}

/// System clock that uses the real system time.
///
/// This is the default clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Manually advanced clock for testing.
///
/// Starts at a caller-supplied timestamp and only moves when the test calls
/// [`advance`](Self::advance) or [`set`](Self::set).
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock pinned at the given Unix timestamp.
    #[must_use]
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    /// Advances the clock by `secs` seconds.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Pins the clock to an absolute timestamp.
    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_secs(), 1_000);
        clock.advance(30);
        assert_eq!(clock.now_secs(), 1_030);
        clock.set(500);
        assert_eq!(clock.now_secs(), 500);
    }

    #[test]
    fn test_system_clock_is_nonzero() {
        // Any real system after the epoch satisfies this.
        assert!(SystemClock.now_secs() > 0);
    }
}
