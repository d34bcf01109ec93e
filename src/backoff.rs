//! Exponential backoff for retries.
//!
//! Attempt semantics: attempt index `0` represents the initial call (no delay), and retries
//! start at `attempt = 1`. The delay is
//! `min(max, base * multiplier^(attempt - 1))`, so the first retry waits exactly `base`.
//! Delays saturate at [`MAX_BACKOFF`] to avoid overflow.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use callgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(0)); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(6), Duration::from_secs(2)); // capped
//! ```

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
    #[error("multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
}

/// Capped exponential backoff with a configurable multiplier.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    max: Option<Duration>,
}

impl Backoff {
    /// Create an exponential backoff strategy that doubles each retry.
    pub fn exponential(base: Duration) -> Self {
        Self { base, multiplier: 2.0, max: None }
    }

    /// Replace the growth factor of an exponential backoff. Must be finite and >= 1.
    pub fn with_multiplier(mut self, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::InvalidMultiplier(factor));
        }
        self.multiplier = factor;
        Ok(self)
    }

    /// Set a maximum delay. Returns an error if `max` is zero or below the base.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    /// Calculate the delay for a given attempt number (0-based; 0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let factor = self.multiplier.powi(exponent);
        let micros = (self.base.as_micros() as f64 * factor).round();
        let raw = if micros.is_finite() && micros < MAX_BACKOFF.as_micros() as f64 {
            Duration::from_micros(micros as u64)
        } else {
            MAX_BACKOFF
        };
        let capped = self.max.map(|m| raw.min(m)).unwrap_or(raw);
        capped.min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100)); // 100 * 2^0
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(5), Duration::from_millis(1600));
    }

    #[test]
    fn custom_multiplier_is_applied() {
        let backoff = Backoff::exponential(Duration::from_millis(1000))
            .with_multiplier(1.5)
            .unwrap();
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(1500));
        assert_eq!(backoff.delay(3), Duration::from_millis(2250));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1))
            .unwrap();

        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1)); // Capped
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(1_000_000_000), MAX_BACKOFF);
    }

    #[test]
    fn zero_max_is_rejected() {
        let err = Backoff::exponential(Duration::from_secs(1)).with_max(Duration::ZERO).unwrap_err();
        assert_eq!(err, BackoffError::MaxMustBePositive);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let err = Backoff::exponential(Duration::from_secs(100))
            .with_max(Duration::from_secs(50))
            .unwrap_err();
        assert!(matches!(err, BackoffError::MaxLessThanBase { .. }));

        let err = Backoff::exponential(Duration::from_secs(1)).with_multiplier(0.5).unwrap_err();
        assert_eq!(err, BackoffError::InvalidMultiplier(0.5));
        assert!(Backoff::exponential(Duration::from_secs(1)).with_multiplier(f64::NAN).is_err());
    }

    #[test]
    fn zero_base_behaves() {
        let exp = Backoff::exponential(Duration::ZERO);
        assert_eq!(exp.delay(3), Duration::ZERO);
    }
}
