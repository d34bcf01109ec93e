use super::events::{GovernorEvent, RequestState};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Ready = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// A telemetry sink that consumes governor events.
pub trait TelemetrySink:
    Service<GovernorEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + Sync + 'static;
}

/// Type-erased sink as held by the executor.
pub type BoxedSink = BoxCloneService<GovernorEvent, (), BoxError>;

/// Erase a sink's concrete type.
pub fn boxed<S>(sink: S) -> BoxedSink
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    BoxCloneService::new(sink.map_err(|e| Box::new(e) as BoxError))
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// The call is awaited, so the caller waits for the sink to finish.
pub async fn emit_best_effort<S>(sink: S, event: GovernorEvent)
where
    S: Service<GovernorEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::fmt::Display + Send + 'static,
    S::Future: Send + 'static,
{
    let outcome = match sink.ready_oneshot().await {
        Ok(mut ready_sink) => ready_sink.call(event).await,
        Err(error) => Err(error),
    };
    if let Err(error) = outcome {
        tracing::debug!(target: "callgate::telemetry", %error, "telemetry sink failed; event dropped");
    }
}

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GovernorEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GovernorEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events through `tracing`; failures at `warn`, everything else at `debug`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GovernorEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GovernorEvent) -> Self::Future {
        match event.state {
            RequestState::FailedTerminal => {
                tracing::warn!(target: "callgate::telemetry", event = %event, "governor_event")
            }
            _ => tracing::debug!(target: "callgate::telemetry", event = %event, "governor_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory, evicting the oldest beyond capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<GovernorEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<GovernorEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<GovernorEvent> {
        self.guard().iter().cloned().collect()
    }

    /// The recorded state sequence, oldest first.
    pub fn states(&self) -> Vec<RequestState> {
        self.guard().iter().map(|e| e.state).collect()
    }

    pub fn count(&self, state: RequestState) -> usize {
        self.guard().iter().filter(|e| e.state == state).count()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GovernorEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GovernorEvent) -> Self::Future {
        let mut guard = self.guard();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
