//! Engine knobs loaded from environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `CALLGATE_MIN_SPACING_MS` | 2000 | minimum gap between dispatches on one throttle lane |
//! | `CALLGATE_MAX_ATTEMPTS` | 5 | dispatches per task for `ThrottleQueue::schedule` callers |
//! | `CALLGATE_MAX_RETRIES` | 3 | default `RetryPolicy::max_retries` |
//!
//! Unset values use the default silently; present values that are not finite non-negative
//! numbers use the default and log a warning.

use crate::executor::RetryPolicy;
use crate::throttle::{ThrottleConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_SPACING};
use std::env;
use std::time::Duration;
use tracing::warn;

pub const MIN_SPACING_VAR: &str = "CALLGATE_MIN_SPACING_MS";
pub const MAX_ATTEMPTS_VAR: &str = "CALLGATE_MAX_ATTEMPTS";
pub const MAX_RETRIES_VAR: &str = "CALLGATE_MAX_RETRIES";

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Process-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub min_spacing: Duration,
    pub max_attempts: usize,
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_spacing: DEFAULT_MIN_SPACING,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary lookup (tests, config files).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let min_spacing = read_number(&lookup, MIN_SPACING_VAR, 0.0)
            .map(|ms| Duration::from_millis(ms.round() as u64))
            .unwrap_or(defaults.min_spacing);
        let max_attempts = read_number(&lookup, MAX_ATTEMPTS_VAR, 1.0)
            .map(|n| n.floor() as usize)
            .unwrap_or(defaults.max_attempts);
        let max_retries = read_number(&lookup, MAX_RETRIES_VAR, 0.0)
            .map(|n| n.floor().min(f64::from(u32::MAX)) as u32)
            .unwrap_or(defaults.max_retries);
        Self { min_spacing, max_attempts, max_retries }
    }

    /// Throttle lane settings derived from this config.
    pub fn throttle_config(&self) -> ThrottleConfig {
        let mut config = ThrottleConfig::default().with_min_spacing(self.min_spacing);
        config.max_attempts = self.max_attempts.max(1);
        config
    }

    /// Default retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_retries: self.max_retries, ..RetryPolicy::default() }
    }
}

/// Parse `name` as a finite number no smaller than `min`. `None` when unset or invalid.
fn read_number<F>(lookup: &F, name: &str, min: f64) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= min && value <= u64::MAX as f64 => Some(value),
        _ => {
            warn!(target: "callgate::config", var = name, value = trimmed, "invalid value; using default");
            None
        }
    }
}
