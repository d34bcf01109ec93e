//! Request lifecycle telemetry.
//!
//! The executor reports every state transition of a logical request as a [`GovernorEvent`].
//! Events flow into a [`TelemetrySink`], which is a `tower::Service<GovernorEvent>` so sinks
//! compose with ordinary tower tooling. Emission is best effort: a sink that errors or is not
//! ready never changes the outcome of a governed call. Sinks are awaited inline so events keep
//! their order, which means a slow sink slows the request down; sinks that do I/O should hand
//! events to a channel and return.
//!
//! Lifecycle of one request:
//!
//! ```text
//! Pending -> WaitingQuota? -> Dispatched -> Success
//!                                        -> FailedRetryable -> WaitingBackoff -> Dispatched ...
//!                                        -> FailedTerminal
//! ```

pub mod events;
pub mod sinks;

pub use events::{GovernorEvent, RequestState};
pub use sinks::{boxed, emit_best_effort, BoxedSink, LogSink, MemorySink, NullSink, TelemetrySink};
