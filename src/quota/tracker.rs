//! Key -> bucket map with per-bucket single-writer sections.

use super::config::normalize;
use super::{Bucket, ConfigRegistry, RateLimitConfig, RateLimitConfigPatch, RateLimitStatus};
use crate::clock::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Empty buckets idle for longer than this are dropped by [`QuotaTracker::sweep`].
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

type SharedBucket = Arc<Mutex<Bucket>>;

/// Per-resource-key quota accounting.
///
/// Every admission check, record and peek locks the key's bucket for its whole
/// read-modify-write, so two concurrent checks can never both take the last slot.
#[derive(Debug)]
pub struct QuotaTracker {
    configs: ConfigRegistry,
    buckets: Mutex<HashMap<String, SharedBucket>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl QuotaTracker {
    /// Create a tracker whose unconfigured keys use `fallback`.
    pub fn new(fallback: RateLimitConfig) -> Self {
        Self {
            configs: ConfigRegistry::new(fallback),
            buckets: Mutex::new(HashMap::new()),
            clock: Arc::new(MonotonicClock::default()),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn configs(&self) -> &ConfigRegistry {
        &self.configs
    }

    /// Install a full config for a provider or resource key.
    pub fn install(&self, key: &str, config: RateLimitConfig) {
        info!(target: "callgate::quota", key, ?config, "rate limit config installed");
        self.configs.install(key, config);
    }

    /// Merge a partial override into the key's config. Bucket state is kept.
    pub fn set_config(&self, key: &str, patch: &RateLimitConfigPatch) -> RateLimitConfig {
        let merged = self.configs.patch(key, patch);
        info!(target: "callgate::quota", key, config = ?merged, "rate limit config updated");
        merged
    }

    pub fn config_for(&self, key: &str) -> RateLimitConfig {
        self.configs.resolve(key)
    }

    pub fn is_configured(&self, key: &str) -> bool {
        self.configs.is_configured(key)
    }

    /// Decide whether a call for `key` may go now. An allowed decision reserves its slot, so
    /// the caller must follow up with [`record_request`](Self::record_request).
    pub fn check_admission(&self, key: &str) -> RateLimitStatus {
        let config = self.configs.resolve(key);
        let now = self.clock.now_millis();
        let bucket = self.bucket(key);
        let mut bucket = lock(&bucket);
        let status = bucket.evaluate(now, &config);
        if status.allowed {
            bucket.reserve(now);
        } else {
            debug!(
                target: "callgate::quota",
                key,
                retry_after_ms = status.retry_after_ms(),
                reason = ?status.reason,
                "admission denied"
            );
        }
        status
    }

    /// Compute the admission decision for `key` without reserving anything.
    pub fn peek(&self, key: &str) -> RateLimitStatus {
        let config = self.configs.resolve(key);
        let now = self.clock.now_millis();
        match self.existing(key) {
            Some(bucket) => lock(&bucket).evaluate(now, &config),
            None => Bucket::new(now).evaluate(now, &config),
        }
    }

    /// Record the outcome of a dispatched call.
    pub fn record_request(&self, key: &str, success: bool) {
        let config = self.configs.resolve(key);
        let now = self.clock.now_millis();
        let bucket = self.bucket(key);
        lock(&bucket).record(now, success, &config);
    }

    /// Drop the bucket for `key`. Returns whether one existed.
    pub fn reset(&self, key: &str) -> bool {
        let removed = lock(&self.buckets).remove(&normalize(key)).is_some();
        if removed {
            info!(target: "callgate::quota", key, "bucket reset");
        }
        removed
    }

    pub fn reset_all(&self) {
        lock(&self.buckets).clear();
    }

    /// Run cleanup on every bucket and drop the ones that are empty and idle past retention.
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut buckets = lock(&self.buckets);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            // Handles are only cloned under the map lock, so a count of one means no caller
            // is between lookup and lock on this bucket.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let mut guard = lock(bucket);
            guard.cleanup_at(now, false);
            !guard.is_idle(now, self.retention)
        });
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(target: "callgate::quota", removed, remaining = buckets.len(), "swept idle buckets");
        }
        removed
    }

    pub fn bucket_count(&self) -> usize {
        lock(&self.buckets).len()
    }

    /// Copy of the current bucket state for `key`, if one exists.
    pub fn snapshot(&self, key: &str) -> Option<Bucket> {
        self.existing(key).map(|bucket| lock(&bucket).clone())
    }

    fn existing(&self, key: &str) -> Option<SharedBucket> {
        lock(&self.buckets).get(&normalize(key)).cloned()
    }

    fn bucket(&self, key: &str) -> SharedBucket {
        let mut buckets = lock(&self.buckets);
        buckets
            .entry(normalize(key))
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(self.clock.now_millis()))))
            .clone()
    }
}

// Bucket data stays consistent across a panic in a caller, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
