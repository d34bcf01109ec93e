//! Clock abstractions used by the quota tracker and throttle lanes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: resets when the process restarts. Quota state is process-local, so nothing needs to
/// survive a restart.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for deterministic tests.
///
/// Clones share the same underlying time, so a clock handed to the tracker and a
/// [`ManualSleeper`](crate::sleeper::ManualSleeper) observe the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start at an explicit millisecond offset.
    pub fn starting_at(millis: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(millis)) }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(10);
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_millis(), 260);
        other.set(5);
        assert_eq!(clock.now_millis(), 5);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::default();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
