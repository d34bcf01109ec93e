use callgate::{
    ErrorKind, GovernorLayer, ManualClock, ManualSleeper, MemorySink, RateLimitConfig,
    RateLimitedExecutor, RawFailure, RequestState, ThrottleConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

fn executor(events: &MemorySink) -> RateLimitedExecutor {
    let clock = ManualClock::new();
    RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .provider("openai", RateLimitConfig::new(2, 60))
        .throttle(ThrottleConfig::default().with_min_spacing(Duration::ZERO))
        .telemetry(events.clone())
        .build()
}

#[tokio::test]
async fn service_builder_stack_governs_each_request() {
    let events = MemorySink::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let svc = ServiceBuilder::new()
        .layer(GovernorLayer::new(executor(&events), "openai", "embeddings"))
        .service(service_fn(move |text: &'static str| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, RawFailure>(text.len()) }
        }));

    for text in ["a", "bb", "ccc"] {
        let len = svc.clone().oneshot(text).await.unwrap();
        assert_eq!(len, text.len());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(events.count(RequestState::Success), 3);
    // Third request exceeded two per second and had to wait for the window.
    assert_eq!(events.count(RequestState::WaitingQuota), 1);
}

#[tokio::test]
async fn validation_errors_pass_through_classified() {
    let events = MemorySink::new();
    let svc = ServiceBuilder::new()
        .layer(GovernorLayer::new(executor(&events), "openai", "chat"))
        .service(service_fn(|_: ()| async {
            Err::<(), _>(RawFailure::http(400, "This model's maximum context length is 8192 tokens"))
        }));

    let err = svc.oneshot(()).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));
    assert_eq!(events.count(RequestState::Dispatched), 1);
    assert_eq!(events.count(RequestState::FailedTerminal), 1);
}
