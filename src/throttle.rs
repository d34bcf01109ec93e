//! Serialized per-provider execution lanes.
//!
//! Each provider key owns one lane. Tasks on the same lane run strictly one at a time in
//! submission order; before a task dispatches, the lane waits until `min_spacing` has passed
//! since the previous dispatch on that lane finished. Lanes for different keys never wait on
//! each other.
//!
//! Inside a lane a small retry loop absorbs upstream throttling: 429, 5xx and transport
//! failures are retried after the provider's `Retry-After` (when it sent a usable one) or an
//! exponential fallback plus jitter. Any other failure, or the last permitted attempt, returns the
//! provider error unchanged. [`ThrottleQueue::dispatch`] skips that loop for callers that
//! admit, record and retry every dispatch themselves.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use callgate::{RawFailure, ThrottleConfig, ThrottleQueue};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let queue = ThrottleQueue::new(
//!     ThrottleConfig::default().with_min_spacing(Duration::from_millis(10)),
//! );
//! let value = queue
//!     .schedule("youtube", || async { Ok::<_, RawFailure>(7) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 7);
//! # });
//! ```

use crate::backoff::Backoff;
use crate::clock::{Clock, MonotonicClock};
use crate::dynamic::DynamicConfig;
use crate::error::BuildError;
use crate::failure::ProviderFailure;
use crate::jitter::Jitter;
use crate::quota::config::normalize;
use crate::retry_after::parse_retry_after;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MIN_SPACING: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Lane settings shared by every provider key of a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    pub min_spacing: Duration,
    /// Total dispatches per task, first try included.
    pub max_attempts: usize,
    /// Fallback delay when a throttle signal carries no usable `Retry-After`.
    pub backoff: Backoff,
    pub jitter: Jitter,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        Self {
            min_spacing: DEFAULT_MIN_SPACING,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: backoff.clone().with_max(Duration::from_secs(60)).unwrap_or(backoff),
            jitter: Jitter::additive(Duration::from_millis(250)),
        }
    }
}

impl ThrottleConfig {
    pub fn with_min_spacing(mut self, spacing: Duration) -> Self {
        self.min_spacing = spacing;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::ZeroAttempts);
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }
}

#[derive(Debug, Default)]
struct Lane {
    last_completed_at: Option<u64>,
}

type SharedLane = Arc<tokio::sync::Mutex<Lane>>;

/// Per-provider FIFO lanes with minimum spacing and in-lane throttle retries.
#[derive(Debug)]
pub struct ThrottleQueue {
    config: DynamicConfig<ThrottleConfig>,
    lanes: Mutex<HashMap<String, SharedLane>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ThrottleQueue {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl ThrottleQueue {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config: DynamicConfig::new(config),
            lanes: Mutex::new(HashMap::new()),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> Arc<ThrottleConfig> {
        self.config.get()
    }

    /// Replace the lane settings. Tasks already dispatching keep the settings they started with.
    pub fn set_config(&self, config: ThrottleConfig) {
        self.config.set(config);
    }

    /// Run `operation` on the lane for `key`.
    ///
    /// The closure is called once per dispatch, so in-lane retries get a fresh future each time.
    pub async fn schedule<T, E, Op, Fut>(&self, key: &str, mut operation: Op) -> Result<T, E>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lane = self.lane(key);
        let mut lane = lane.lock().await;
        let config = self.config.get();
        let mut attempt = 0usize;

        loop {
            self.await_spacing(&lane, config.min_spacing).await;
            attempt += 1;
            let result = operation().await;
            lane.last_completed_at = Some(self.clock.now_millis());

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_throttle_signal() || attempt >= config.max_attempts {
                if error.is_throttle_signal() {
                    warn!(
                        target: "callgate::throttle",
                        key,
                        attempts = attempt,
                        error = %error,
                        "throttle retries exhausted"
                    );
                }
                return Err(error);
            }

            let delay = match error.retry_after().as_deref().and_then(parse_retry_after) {
                Some(delay) => delay,
                None => config.jitter.apply(config.backoff.delay(attempt)),
            };
            warn!(
                target: "callgate::throttle",
                key,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "upstream throttled; retrying in lane"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// Run `operation` exactly once on the lane for `key`: FIFO order and spacing, no retries.
    pub async fn dispatch<T, Op, Fut>(&self, key: &str, operation: Op) -> T
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self.lane(key);
        let mut lane = lane.lock().await;
        let spacing = self.config.get().min_spacing;
        self.await_spacing(&lane, spacing).await;
        let output = operation().await;
        lane.last_completed_at = Some(self.clock.now_millis());
        output
    }

    async fn await_spacing(&self, lane: &Lane, spacing: Duration) {
        let Some(last) = lane.last_completed_at else {
            return;
        };
        let elapsed = Duration::from_millis(self.clock.now_millis().saturating_sub(last));
        if let Some(remaining) = spacing.checked_sub(elapsed).filter(|d| !d.is_zero()) {
            debug!(
                target: "callgate::throttle",
                wait_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                "spacing lane"
            );
            self.sleeper.sleep(remaining).await;
        }
    }

    /// Number of lanes currently held.
    pub fn lane_count(&self) -> usize {
        lock(&self.lanes).len()
    }

    /// Drop lanes that are not in use and finished their last task more than `idle` ago.
    pub fn prune(&self, idle: Duration) -> usize {
        let now = self.clock.now_millis();
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        let mut lanes = lock(&self.lanes);
        let before = lanes.len();
        lanes.retain(|_, lane| {
            if Arc::strong_count(lane) > 1 {
                return true;
            }
            match lane.try_lock() {
                Ok(guard) => match guard.last_completed_at {
                    Some(last) => now.saturating_sub(last) < idle_ms,
                    None => false,
                },
                Err(_) => true,
            }
        });
        before - lanes.len()
    }

    /// Forget every lane, including spacing history.
    pub fn clear(&self) {
        lock(&self.lanes).clear();
    }

    fn lane(&self, key: &str) -> SharedLane {
        lock(&self.lanes).entry(normalize(key)).or_default().clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
