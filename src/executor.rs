//! The rate-limited executor: the public facade of the engine.
//!
//! Every governed call walks the same path:
//!
//! 1. admission check on the [`QuotaTracker`], suspending while denied,
//! 2. dispatch through the provider's [`ThrottleQueue`] lane,
//! 3. outcome recorded back to the tracker,
//! 4. for `execute_with_retry`, classification by the [`ErrorClassifier`] and a backoff loop
//!    bounded by the effective [`RetryPolicy`].
//!
//! The executor is an explicitly constructed service. Clones share state; build one per process
//! and hand it to the integrations that need it.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use callgate::{RateLimitConfig, RateLimitedExecutor, RawFailure, ThrottleConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let executor = RateLimitedExecutor::builder()
//!     .provider("youtube", RateLimitConfig::new(5, 100).per_day(10_000))
//!     .throttle(ThrottleConfig::default().with_min_spacing(Duration::ZERO))
//!     .build();
//!
//! let views = executor
//!     .execute_with_retry("youtube", "videos.list", || async { Ok::<_, RawFailure>(42u64) })
//!     .await
//!     .unwrap();
//! assert_eq!(views, 42);
//! # });
//! ```

mod layer;
mod policy;

pub use layer::{GovernorLayer, GovernorService};
pub use policy::{RetryPolicy, RetryPolicyBuilder};

use crate::classifier::{provider_name, ErrorClassifier};
use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::dynamic::DynamicConfig;
use crate::error::GovernorError;
use crate::failure::ProviderFailure;
use crate::quota::config::normalize;
use crate::quota::{
    QuotaTracker, RateLimitConfig, RateLimitConfigPatch, RateLimitStatus, DEFAULT_RETENTION,
};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{
    boxed, emit_best_effort, BoxedSink, GovernorEvent, NullSink, RequestState, TelemetrySink,
};
use crate::throttle::{ThrottleConfig, ThrottleQueue};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

struct Inner {
    tracker: QuotaTracker,
    throttle: ThrottleQueue,
    classifier: ErrorClassifier,
    default_policy: DynamicConfig<RetryPolicy>,
    provider_policies: DynamicConfig<HashMap<String, RetryPolicy>>,
    sleeper: Arc<dyn Sleeper>,
    sink: Mutex<BoxedSink>,
    require_configured: bool,
    sweepers: Mutex<Vec<AbortHandle>>,
}

impl Inner {
    fn sweep(&self) -> usize {
        let buckets = self.tracker.sweep();
        let lanes = self.throttle.prune(DEFAULT_RETENTION);
        if buckets + lanes > 0 {
            debug!(target: "callgate::executor", buckets, lanes, "maintenance sweep");
        }
        buckets + lanes
    }

    fn abort_sweepers(&self) {
        for handle in lock(&self.sweepers).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_sweepers();
    }
}

/// Quota-checked, throttled, classified execution of provider calls.
#[derive(Clone)]
pub struct RateLimitedExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for RateLimitedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedExecutor")
            .field("tracker", &self.inner.tracker)
            .field("throttle", &self.inner.throttle)
            .field("default_policy", &self.inner.default_policy.get())
            .field("require_configured", &self.inner.require_configured)
            .finish_non_exhaustive()
    }
}

impl Default for RateLimitedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitedExecutor {
    /// Executor with default settings and the built-in classifier rules.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Executor whose engine knobs come from `CALLGATE_*` environment variables.
    pub fn from_env() -> Self {
        Self::builder().engine_config(EngineConfig::from_env()).build()
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    pub fn tracker(&self) -> &QuotaTracker {
        &self.inner.tracker
    }

    pub fn throttle(&self) -> &ThrottleQueue {
        &self.inner.throttle
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.classifier
    }

    /// One governed call: admission, lane dispatch, outcome recording. The provider's own error
    /// is returned as [`GovernorError::Inner`].
    pub async fn execute<T, E, Op, Fut>(
        &self,
        key: &str,
        operation: &str,
        mut op: Op,
    ) -> Result<T, GovernorError<E>>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.ensure_configured(key)?;
        match self.run_once(key, operation, 1, &mut op).await {
            Ok(value) => {
                self.emit(GovernorEvent::new(key, operation, 1, RequestState::Success)).await;
                Ok(value)
            }
            Err(error) => {
                self.emit(GovernorEvent::new(key, operation, 1, RequestState::FailedTerminal)).await;
                Err(GovernorError::Inner(error))
            }
        }
    }

    /// [`execute`](Self::execute) in a classified retry loop using the key's effective policy.
    pub async fn execute_with_retry<T, E, Op, Fut>(
        &self,
        key: &str,
        operation: &str,
        op: Op,
    ) -> Result<T, GovernorError<E>>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.retry_policy_for(key);
        self.execute_with_policy(key, operation, &policy, op).await
    }

    /// [`execute_with_retry`](Self::execute_with_retry) with an explicit policy override.
    ///
    /// Non-retryable classifications end the loop at once. Exhausting the budget returns the
    /// last classified error together with its raw source.
    pub async fn execute_with_policy<T, E, Op, Fut>(
        &self,
        key: &str,
        operation: &str,
        policy: &RetryPolicy,
        mut op: Op,
    ) -> Result<T, GovernorError<E>>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.ensure_configured(key)?;
        let provider = provider_name(key);
        let total = policy.total_attempts();
        let mut attempt = 1u32;

        loop {
            let error = match self.run_once(key, operation, attempt, &mut op).await {
                Ok(value) => {
                    self.emit(GovernorEvent::new(key, operation, attempt, RequestState::Success))
                        .await;
                    if attempt > 1 {
                        info!(target: "callgate::executor", key, operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let classified = self.inner.classifier.classify(&provider, operation, &error);
            if !classified.retryable || attempt >= total {
                if classified.retryable {
                    warn!(
                        target: "callgate::executor",
                        key,
                        operation,
                        attempts = attempt,
                        kind = %classified.kind,
                        "retries exhausted"
                    );
                } else {
                    info!(
                        target: "callgate::executor",
                        key,
                        operation,
                        attempt,
                        kind = %classified.kind,
                        "non-retryable failure"
                    );
                }
                self.emit(
                    GovernorEvent::new(key, operation, attempt, RequestState::FailedTerminal)
                        .with_kind(classified.kind),
                )
                .await;
                return Err(GovernorError::Classified { error: classified, source: error });
            }

            let backoff = policy.delay_for(attempt);
            let wait = classified.retry_after.map_or(backoff, |hint| hint.max(backoff));
            info!(
                target: "callgate::executor",
                key,
                operation,
                attempt,
                kind = %classified.kind,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "retrying"
            );
            self.emit(
                GovernorEvent::new(key, operation, attempt, RequestState::FailedRetryable)
                    .with_kind(classified.kind),
            )
            .await;
            self.emit(
                GovernorEvent::new(key, operation, attempt, RequestState::WaitingBackoff)
                    .with_wait(wait),
            )
            .await;
            self.inner.sleeper.sleep(wait).await;
            attempt += 1;
        }
    }

    /// Run `ops` through [`execute`](Self::execute) in chunks of `concurrency`: operations in a
    /// chunk run concurrently, chunks run one after another. Results keep input order.
    pub async fn execute_batch<T, E, Op, Fut, I>(
        &self,
        key: &str,
        operation: &str,
        ops: I,
        concurrency: usize,
    ) -> Vec<Result<T, GovernorError<E>>>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        I: IntoIterator<Item = Op>,
    {
        let concurrency = concurrency.max(1);
        let mut ops = ops.into_iter();
        let mut results = Vec::new();
        loop {
            let chunk: Vec<Op> = ops.by_ref().take(concurrency).collect();
            if chunk.is_empty() {
                break;
            }
            let running = chunk.into_iter().map(|op| self.execute(key, operation, op));
            results.extend(join_all(running).await);
        }
        results
    }

    /// Admission status for `key` without reserving anything.
    pub fn check_rate_limit(&self, key: &str) -> RateLimitStatus {
        self.inner.tracker.peek(key)
    }

    /// Install a full rate limit config for a provider or resource key.
    pub fn install_config(&self, key: &str, config: RateLimitConfig) {
        self.inner.tracker.install(key, config);
    }

    /// Merge a partial override into the key's rate limit config.
    pub fn set_config(&self, key: &str, patch: RateLimitConfigPatch) -> RateLimitConfig {
        self.inner.tracker.set_config(key, &patch)
    }

    /// Clear the quota bucket for `key`.
    pub fn reset(&self, key: &str) -> bool {
        self.inner.tracker.reset(key)
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.inner.default_policy.set(policy);
    }

    /// Override the retry policy for a provider or resource key.
    pub fn set_provider_retry_policy(&self, key: &str, policy: RetryPolicy) {
        let key = normalize(key);
        self.inner.provider_policies.update(|map| {
            let mut next = map.clone();
            next.insert(key.clone(), policy.clone());
            next
        });
    }

    /// Effective policy: exact key, then provider, then the default.
    pub fn retry_policy_for(&self, key: &str) -> RetryPolicy {
        let overrides = self.inner.provider_policies.get();
        let key = normalize(key);
        overrides
            .get(&key)
            .or_else(|| overrides.get(&provider_name(&key)))
            .cloned()
            .unwrap_or_else(|| (*self.inner.default_policy.get()).clone())
    }

    /// Drop idle quota buckets and throttle lanes now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Run [`sweep`](Self::sweep) every `interval` on the current tokio runtime.
    ///
    /// The task stops when the returned handle is dropped, on [`dispose`](Self::dispose), or
    /// once the last executor clone is gone.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.sweep();
            }
        });
        lock(&self.inner.sweepers).push(handle.abort_handle());
        SweeperHandle { handle }
    }

    /// Stop background maintenance and drop all buckets, lanes and diagnostics.
    pub fn dispose(&self) {
        self.inner.abort_sweepers();
        self.inner.tracker.reset_all();
        self.inner.throttle.clear();
        self.inner.classifier.clear_diagnostics();
        info!(target: "callgate::executor", "executor disposed");
    }

    fn ensure_configured<E>(&self, key: &str) -> Result<(), GovernorError<E>> {
        if self.inner.require_configured && !self.inner.tracker.is_configured(key) {
            warn!(target: "callgate::executor", key, "no rate limit configuration; refusing call");
            return Err(GovernorError::NotConfigured { provider: provider_name(key) });
        }
        Ok(())
    }

    async fn run_once<T, E, Op, Fut>(
        &self,
        key: &str,
        operation: &str,
        attempt: u32,
        op: &mut Op,
    ) -> Result<T, E>
    where
        E: ProviderFailure,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if attempt == 1 {
            self.emit(GovernorEvent::new(key, operation, attempt, RequestState::Pending)).await;
        }
        loop {
            let status = self.inner.tracker.check_admission(key);
            if status.allowed {
                break;
            }
            let wait = status
                .retry_after
                .unwrap_or_else(|| self.inner.tracker.config_for(key).retry_after_default);
            self.emit(
                GovernorEvent::new(key, operation, attempt, RequestState::WaitingQuota)
                    .with_wait(wait),
            )
            .await;
            self.inner.sleeper.sleep(wait).await;
        }

        self.emit(GovernorEvent::new(key, operation, attempt, RequestState::Dispatched)).await;
        // One physical call per admission, so the tracker sees every request.
        let result = self.inner.throttle.dispatch(key, &mut *op).await;
        self.inner.tracker.record_request(key, result.is_ok());
        result
    }

    // Awaited inline to keep event order; sink failures are dropped.
    async fn emit(&self, event: GovernorEvent) {
        let sink = lock(&self.inner.sink).clone();
        emit_best_effort(sink, event).await;
    }
}

/// Background sweeper task; aborted when dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builder for [`RateLimitedExecutor`].
pub struct ExecutorBuilder {
    fallback: RateLimitConfig,
    providers: Vec<(String, RateLimitConfig)>,
    engine: EngineConfig,
    throttle: Option<ThrottleConfig>,
    retry_policy: Option<RetryPolicy>,
    provider_policies: HashMap<String, RetryPolicy>,
    classifier: Option<ErrorClassifier>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sink: BoxedSink,
    require_configured: bool,
}

impl fmt::Debug for ExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("fallback", &self.fallback)
            .field("providers", &self.providers)
            .field("engine", &self.engine)
            .field("require_configured", &self.require_configured)
            .finish_non_exhaustive()
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            fallback: RateLimitConfig::default(),
            providers: Vec::new(),
            engine: EngineConfig::default(),
            throttle: None,
            retry_policy: None,
            provider_policies: HashMap::new(),
            classifier: None,
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            sink: boxed(NullSink),
            require_configured: false,
        }
    }

    /// Engine knobs; supplies throttle settings and the default retry count unless
    /// [`throttle`](Self::throttle) or [`retry_policy`](Self::retry_policy) override them.
    pub fn engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Config used for keys with nothing installed.
    pub fn fallback_config(mut self, config: RateLimitConfig) -> Self {
        self.fallback = config;
        self
    }

    pub fn provider(mut self, key: impl Into<String>, config: RateLimitConfig) -> Self {
        self.providers.push((key.into(), config));
        self
    }

    pub fn throttle(mut self, config: ThrottleConfig) -> Self {
        self.throttle = Some(config);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn provider_retry_policy(mut self, key: &str, policy: RetryPolicy) -> Self {
        self.provider_policies.insert(normalize(key), policy);
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = boxed(sink);
        self
    }

    /// Refuse keys without an installed config with [`GovernorError::NotConfigured`].
    pub fn require_configured(mut self, strict: bool) -> Self {
        self.require_configured = strict;
        self
    }

    pub fn build(self) -> RateLimitedExecutor {
        let tracker = QuotaTracker::new(self.fallback).with_clock(Arc::clone(&self.clock));
        for (key, config) in self.providers {
            tracker.install(&key, config);
        }
        let throttle = ThrottleQueue::new(
            self.throttle.unwrap_or_else(|| self.engine.throttle_config()),
        )
        .with_clock(Arc::clone(&self.clock))
        .with_sleeper(Arc::clone(&self.sleeper));
        let default_policy = self.retry_policy.unwrap_or_else(|| self.engine.retry_policy());

        RateLimitedExecutor {
            inner: Arc::new(Inner {
                tracker,
                throttle,
                classifier: self.classifier.unwrap_or_default(),
                default_policy: DynamicConfig::new(default_policy),
                provider_policies: DynamicConfig::new(self.provider_policies),
                sleeper: self.sleeper,
                sink: Mutex::new(self.sink),
                require_configured: self.require_configured,
                sweepers: Mutex::new(Vec::new()),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
