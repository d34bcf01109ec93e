//! Retry policy for `execute_with_retry`.

use crate::backoff::Backoff;
use crate::error::BuildError;
use crate::jitter::Jitter;
use std::time::Duration;

/// How many times a classified-retryable failure is retried and how long to wait between tries.
///
/// `max_retries` counts retries only: a policy with `max_retries = 3` makes at most four
/// attempts. The wait before retry `n` (1-based) is `min(max_delay, base_delay *
/// backoff_multiplier^(n-1))`, plus up to 25% proportional jitter when `jitter_enabled`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Attempts including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The backoff curve. Invalid fields (set directly rather than through the builder) fall
    /// back to an uncapped doubling curve.
    pub fn backoff(&self) -> Backoff {
        let base = Backoff::exponential(self.base_delay);
        let grown = base.clone().with_multiplier(self.backoff_multiplier).unwrap_or(base);
        grown.clone().with_max(self.max_delay).unwrap_or(grown)
    }

    pub fn jitter(&self) -> Jitter {
        if self.jitter_enabled {
            Jitter::proportional_default()
        } else {
            Jitter::None
        }
    }

    /// Wait before retry `retry` (1-based), jitter included.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff().delay(retry as usize);
        self.jitter().apply(delay)
    }
}

/// Builder for [`RetryPolicy`], validating the backoff inputs.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        let policy = self.policy;
        if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
            return Err(BuildError::InvalidMultiplier(policy.backoff_multiplier));
        }
        if policy.max_delay < policy.base_delay {
            return Err(BuildError::MaxLessThanBase {
                base: policy.base_delay,
                max: policy.max_delay,
            });
        }
        Ok(policy)
    }
}
