#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # callgate
//!
//! Outbound-call governance for services that talk to rate-limited third-party APIs.
//!
//! ## Features
//!
//! - **Layered quota windows** (second, minute, hour, day) per provider or resource key, with
//!   an optional burst token bucket
//! - **Throttle lanes**: one FIFO lane per provider with minimum spacing between dispatches;
//!   direct `schedule` callers also get in-lane retries honoring `Retry-After`
//! - **Classified retries**: failures are mapped to an [`ErrorKind`] taxonomy with provider
//!   refinements; only retryable kinds are retried, with exponential backoff and jitter
//! - **Telemetry** of request state transitions through a pluggable tower `Service` sink
//! - **Tower layer** to govern an existing client service
//!
//! ## Quick Start
//!
//! ```rust
//! use callgate::{RateLimitConfig, RateLimitedExecutor, RawFailure, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = RateLimitedExecutor::builder()
//!         .provider("openai", RateLimitConfig::new(3, 60).per_day(10_000))
//!         .retry_policy(
//!             RetryPolicy::builder()
//!                 .max_retries(2)
//!                 .base_delay(Duration::from_millis(10))
//!                 .build()
//!                 .unwrap(),
//!         )
//!         .build();
//!
//!     let result = executor
//!         .execute_with_retry("openai", "chat.completions", || async {
//!             // Your provider call here
//!             Ok::<_, RawFailure>("done")
//!         })
//!         .await;
//!     assert_eq!(result.unwrap(), "done");
//! }
//! ```

pub mod backoff;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod executor;
pub mod failure;
pub mod jitter;
pub mod quota;
pub mod retry_after;
pub mod sleeper;
pub mod telemetry;
pub mod throttle;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use classifier::{provider_name, ClassifiedError, ErrorClassifier, ErrorKind, ProviderRule};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::EngineConfig;
pub use dynamic::DynamicConfig;
pub use error::{BuildError, GovernorError};
pub use executor::{
    ExecutorBuilder, GovernorLayer, GovernorService, RateLimitedExecutor, RetryPolicy,
    RetryPolicyBuilder, SweeperHandle,
};
pub use failure::{ProviderFailure, RawFailure, Transport};
pub use jitter::Jitter;
pub use quota::{
    DenialReason, QuotaTracker, QuotaWindow, RateLimitConfig, RateLimitConfigPatch,
    RateLimitStatus, WindowKind,
};
pub use retry_after::parse_retry_after;
pub use sleeper::{InstantSleeper, ManualSleeper, Sleeper, TokioSleeper};
pub use telemetry::{GovernorEvent, LogSink, MemorySink, NullSink, RequestState, TelemetrySink};
pub use throttle::{ThrottleConfig, ThrottleQueue};
