//! Per-provider rate limit configuration and its registry.

use crate::classifier::provider_name;
use crate::dynamic::DynamicConfig;
use std::collections::HashMap;
use std::time::Duration;

/// Burst refill interval when neither an explicit interval nor a per-second rate is set.
pub const DEFAULT_BURST_REFILL: Duration = Duration::from_secs(1);

/// Windows and burst capacity for one provider. A limit of `0` disables that window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
    /// Burst token capacity: how many requests may go at once on top of an idle second window.
    /// Tokens refill at the steady per-second rate.
    pub burst_limit: Option<u32>,
    /// Lower bound for window-denial waits.
    pub retry_after_default: Duration,
    /// Explicit token refill interval. `None` derives it from `per_second`.
    pub burst_refill_interval: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 5,
            per_minute: 60,
            per_hour: None,
            per_day: None,
            burst_limit: None,
            retry_after_default: Duration::from_millis(1000),
            burst_refill_interval: None,
        }
    }
}

impl RateLimitConfig {
    pub fn new(per_second: u32, per_minute: u32) -> Self {
        Self { per_second, per_minute, ..Self::default() }
    }

    pub fn per_hour(mut self, limit: u32) -> Self {
        self.per_hour = Some(limit);
        self
    }

    pub fn per_day(mut self, limit: u32) -> Self {
        self.per_day = Some(limit);
        self
    }

    pub fn burst(mut self, limit: u32) -> Self {
        self.burst_limit = Some(limit);
        self
    }

    pub fn retry_after_default(mut self, wait: Duration) -> Self {
        self.retry_after_default = wait;
        self
    }

    pub fn burst_refill_interval(mut self, interval: Duration) -> Self {
        self.burst_refill_interval = Some(interval);
        self
    }

    /// Time to earn one burst token: the explicit interval, else one `per_second` slot.
    pub fn refill_interval(&self) -> Duration {
        match (self.burst_refill_interval, self.per_second) {
            (Some(interval), _) => interval,
            (None, 0) => DEFAULT_BURST_REFILL,
            (None, rate) => (Duration::from_millis(1000) / rate).max(Duration::from_millis(1)),
        }
    }

    /// Per-second admissions when burst capacity is active: the larger of the steady rate and
    /// the burst size.
    pub fn second_limit(&self) -> u32 {
        match self.burst_limit.filter(|limit| *limit > 0) {
            Some(burst) => self.per_second.max(burst),
            None => self.per_second,
        }
    }

    /// Merge a partial override into a copy of this config.
    pub fn merged(&self, patch: &RateLimitConfigPatch) -> Self {
        Self {
            per_second: patch.per_second.unwrap_or(self.per_second),
            per_minute: patch.per_minute.unwrap_or(self.per_minute),
            per_hour: patch.per_hour.unwrap_or(self.per_hour),
            per_day: patch.per_day.unwrap_or(self.per_day),
            burst_limit: patch.burst_limit.unwrap_or(self.burst_limit),
            retry_after_default: patch.retry_after_default.unwrap_or(self.retry_after_default),
            burst_refill_interval: patch
                .burst_refill_interval
                .unwrap_or(self.burst_refill_interval),
        }
    }
}

/// Partial override for [`RateLimitConfig`]. `None` keeps the current value; for optional
/// fields `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RateLimitConfigPatch {
    pub per_second: Option<u32>,
    pub per_minute: Option<u32>,
    pub per_hour: Option<Option<u32>>,
    pub per_day: Option<Option<u32>>,
    pub burst_limit: Option<Option<u32>>,
    pub retry_after_default: Option<Duration>,
    pub burst_refill_interval: Option<Option<Duration>>,
}

/// Resolves resource keys to configs. Lookup order: exact key, provider prefix, fallback.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    installed: DynamicConfig<HashMap<String, RateLimitConfig>>,
    fallback: DynamicConfig<RateLimitConfig>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl ConfigRegistry {
    pub fn new(fallback: RateLimitConfig) -> Self {
        Self { installed: DynamicConfig::new(HashMap::new()), fallback: DynamicConfig::new(fallback) }
    }

    /// Install (or replace) the config for a key.
    pub fn install(&self, key: &str, config: RateLimitConfig) {
        let key = normalize(key);
        self.installed.update(|map| {
            let mut next = map.clone();
            next.insert(key.clone(), config.clone());
            next
        });
    }

    /// Merge a partial override into the key's effective config and install the result.
    ///
    /// The merge runs inside the swap, so concurrent patches to one key all land.
    pub fn patch(&self, key: &str, patch: &RateLimitConfigPatch) -> RateLimitConfig {
        let key = normalize(key);
        let fallback = self.fallback();
        let merge = |map: &HashMap<String, RateLimitConfig>| {
            find(map, &key).unwrap_or_else(|| fallback.clone()).merged(patch)
        };
        let previous = self.installed.update(|map| {
            let mut next = map.clone();
            next.insert(key.clone(), merge(map));
            next
        });
        merge(previous.as_ref())
    }

    pub fn set_fallback(&self, config: RateLimitConfig) {
        self.fallback.set(config);
    }

    pub fn fallback(&self) -> RateLimitConfig {
        (*self.fallback.get()).clone()
    }

    /// Effective config for `key`.
    pub fn resolve(&self, key: &str) -> RateLimitConfig {
        self.lookup(key).unwrap_or_else(|| self.fallback())
    }

    /// True when `key` or its provider has an installed config.
    pub fn is_configured(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<RateLimitConfig> {
        find(&self.installed.get(), &normalize(key))
    }
}

/// Exact key, then provider prefix. `key` must already be normalized.
fn find(map: &HashMap<String, RateLimitConfig>, key: &str) -> Option<RateLimitConfig> {
    map.get(key).or_else(|| map.get(&provider_name(key))).cloned()
}

/// Canonical form of a resource key: trimmed and lowercased.
pub(crate) fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}
