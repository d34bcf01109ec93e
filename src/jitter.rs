//! Jitter strategies to prevent thundering herd
//!
//! When to use which strategy:
//! - `None`: deterministic retries for tests or tightly controlled workflows.
//! - `Additive`: `delay + uniform[0, max]`, never waits less than the computed delay. Throttle
//!   lanes use this so an upstream `Retry-After` is never undercut.
//! - `Proportional`: `delay + uniform[0, delay * ratio]`, the retry policy's default.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`. Millisecond conversions saturate to `u64::MAX`.

use rand::{rng, Rng};
use std::time::Duration;

/// Ratio used by [`Jitter::proportional_default`].
pub const DEFAULT_JITTER_RATIO: f64 = 0.25;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Add a random amount between 0 and the given bound
    Additive(Duration),
    /// Add a random fraction (0..=ratio) of the delay itself
    Proportional(f64),
}

impl Jitter {
    /// Add up to `max` on top of every delay.
    pub fn additive(max: Duration) -> Self {
        Jitter::Additive(max)
    }

    /// Add up to `ratio * delay`; non-finite or negative ratios disable jitter.
    pub fn proportional(ratio: f64) -> Self {
        if ratio.is_finite() && ratio > 0.0 {
            Jitter::Proportional(ratio)
        } else {
            Jitter::None
        }
    }

    pub fn proportional_default() -> Self {
        Jitter::Proportional(DEFAULT_JITTER_RATIO)
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = as_millis_saturated(delay);
        match self {
            Jitter::None => delay,
            Jitter::Additive(max) => {
                let bound = as_millis_saturated(*max);
                if bound == 0 {
                    return delay;
                }
                delay.saturating_add(Duration::from_millis(rng.random_range(0..=bound)))
            }
            Jitter::Proportional(ratio) => {
                let bound = (millis as f64 * ratio).min(u64::MAX as f64) as u64;
                if bound == 0 {
                    return delay;
                }
                delay.saturating_add(Duration::from_millis(rng.random_range(0..=bound)))
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_secs(1);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn additive_jitter_never_undercuts_delay() {
        let jitter = Jitter::additive(Duration::from_millis(250));
        let delay = Duration::from_millis(2000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let jittered = jitter.apply_with_rng(delay, &mut rng);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(2250));
        }
    }

    #[test]
    fn proportional_jitter_stays_within_ratio() {
        let jitter = Jitter::proportional(0.5);
        let delay = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let jittered = jitter.apply_with_rng(delay, &mut rng);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn invalid_ratio_disables_jitter() {
        assert_eq!(Jitter::proportional(f64::NAN), Jitter::None);
        assert_eq!(Jitter::proportional(-1.0), Jitter::None);
    }

    #[test]
    fn jitter_handles_zero_delay() {
        assert_eq!(Jitter::proportional_default().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::None.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn saturates_large_durations_without_panicking() {
        let huge = Duration::from_millis(u64::MAX);
        let mut rng = StdRng::seed_from_u64(999);
        let jittered = Jitter::additive(Duration::from_secs(1)).apply_with_rng(huge, &mut rng);
        assert!(jittered >= huge && jittered <= huge + Duration::from_secs(1));
        let jittered = Jitter::proportional(0.5).apply_with_rng(huge, &mut rng);
        assert!(jittered >= huge);
    }
}
