use callgate::{
    Clock, EngineConfig, ErrorKind, ManualClock, ManualSleeper, MemorySink, RateLimitConfig,
    RateLimitedExecutor, RawFailure, RequestState, RetryPolicy, ThrottleConfig, ThrottleQueue,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn quick_policy(retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(retries)
        .base_delay(Duration::from_millis(50))
        .jitter(false)
        .build()
        .unwrap()
}

#[tokio::test]
async fn back_to_back_tasks_are_spaced_by_two_seconds() {
    let clock = ManualClock::new();
    let queue = ThrottleQueue::new(ThrottleConfig::default())
        .with_clock(Arc::new(clock.clone()))
        .with_sleeper(Arc::new(ManualSleeper::new(clock.clone())));
    let dispatches = Arc::new(Mutex::new(Vec::new()));

    let task = |label: &'static str| {
        let clock = clock.clone();
        let dispatches = dispatches.clone();
        move || {
            let clock = clock.clone();
            let dispatches = dispatches.clone();
            async move {
                dispatches.lock().unwrap().push(clock.now_millis());
                clock.advance(Duration::from_millis(300));
                Ok::<_, RawFailure>(label)
            }
        }
    };

    let (a, b) = tokio::join!(
        queue.schedule("youtube", task("first")),
        queue.schedule("youtube", task("second"))
    );
    assert_eq!(a.unwrap(), "first");
    assert_eq!(b.unwrap(), "second");

    let dispatches = dispatches.lock().unwrap().clone();
    let first_completed = dispatches[0] + 300;
    assert!(dispatches[1] >= first_completed + 2000, "dispatches: {dispatches:?}");
}

#[tokio::test]
async fn structural_quota_is_not_retried() {
    let clock = ManualClock::new();
    let events = MemorySink::new();
    let executor = RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .throttle(ThrottleConfig::default().with_min_spacing(Duration::ZERO))
        .retry_policy(quick_policy(3))
        .telemetry(events.clone())
        .build();
    let calls = AtomicUsize::new(0);

    let err = executor
        .execute_with_retry("youtube:channels", "channels.list", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(RawFailure::http(
                    403,
                    "The request cannot be completed because you have exceeded your quotaExceeded",
                ))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.kind(), Some(ErrorKind::QuotaExceeded));
    let classified = err.classified().unwrap();
    assert!(!classified.retryable);
    assert_eq!(classified.provider, "youtube");
    assert_eq!(classified.operation, "channels.list");

    let terminal = events.events().into_iter().last().unwrap();
    assert_eq!(terminal.state, RequestState::FailedTerminal);
    assert_eq!(terminal.kind, Some(ErrorKind::QuotaExceeded));
}

#[tokio::test]
async fn subscription_limit_is_reclassified_for_marketplaces() {
    let clock = ManualClock::new();
    let executor = RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .retry_policy(quick_policy(2))
        .build();

    let err = executor
        .execute_with_retry("rapidapi:tiktok-scraper", "user.info", || async {
            Err::<(), _>(RawFailure::http(400, "You are not subscribed to this API."))
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::QuotaExceeded));
    assert_eq!(executor.classifier().error_count("rapidapi", ErrorKind::QuotaExceeded), 1);
}

#[tokio::test]
async fn every_throttled_dispatch_is_admitted_and_recorded() {
    let clock = ManualClock::new();
    let sleeper = ManualSleeper::new(clock.clone());
    let executor = RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(sleeper.clone())
        .throttle(
            ThrottleConfig::default()
                .with_min_spacing(Duration::ZERO)
                .with_max_attempts(3)
                .unwrap(),
        )
        .retry_policy(quick_policy(2))
        .build();
    let calls = AtomicUsize::new(0);

    let value = executor
        .execute_with_retry("tiktok", "feed", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RawFailure::http(429, "Too Many Requests").with_retry_after("2"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Retry-After outweighs the 50ms backoff on both retries.
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(2), Duration::from_secs(2)]);
    let bucket = executor.tracker().snapshot("tiktok").unwrap();
    assert_eq!(bucket.len(), 3);
    assert_eq!(bucket.successes(), 1);
    assert_eq!(bucket.failures(), 2);
}

#[tokio::test]
async fn default_engine_makes_max_retries_plus_one_calls() {
    let clock = ManualClock::new();
    let executor = RateLimitedExecutor::builder()
        .engine_config(EngineConfig::default())
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .retry_policy(quick_policy(3))
        .build();
    let calls = AtomicUsize::new(0);

    let err = executor
        .execute_with_retry("openai", "chat", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RawFailure::http(503, "Service Unavailable")) }
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ServerError));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(executor.tracker().snapshot("openai").unwrap().len(), 4);
}

#[tokio::test]
async fn throttled_dispatches_respect_the_minute_window() {
    let clock = ManualClock::new();
    let events = MemorySink::new();
    let executor = RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock.clone()))
        .provider("scraper", RateLimitConfig::new(0, 2))
        .throttle(ThrottleConfig::default().with_min_spacing(Duration::ZERO))
        .retry_policy(quick_policy(4))
        .telemetry(events.clone())
        .build();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let _ = executor
        .execute_with_retry("scraper", "search", || {
            calls.lock().unwrap().push(clock.now_millis());
            async { Err::<(), _>(RawFailure::http(429, "Too Many Requests").with_retry_after("1")) }
        })
        .await;

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 5);
    assert_eq!(executor.tracker().snapshot("scraper").unwrap().len(), 5);
    // No sixty-second span ever holds more than two dispatches.
    for pair in calls.windows(3) {
        assert!(pair[2] - pair[0] >= 60_000, "dispatches: {calls:?}");
    }
    assert!(events.count(RequestState::WaitingQuota) >= 2);
}

#[tokio::test]
async fn engine_config_from_lookup_drives_defaults() {
    let engine = EngineConfig::from_lookup(|name| match name {
        "CALLGATE_MIN_SPACING_MS" => Some("0".to_string()),
        "CALLGATE_MAX_RETRIES" => Some("1".to_string()),
        "CALLGATE_MAX_ATTEMPTS" => Some("1".to_string()),
        _ => None,
    });
    let clock = ManualClock::new();
    let executor = RateLimitedExecutor::builder()
        .engine_config(engine)
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .fallback_config(RateLimitConfig::new(10, 100))
        .build();

    assert_eq!(executor.retry_policy_for("anything").max_retries, 1);
    assert_eq!(executor.throttle().config().min_spacing, Duration::ZERO);

    let calls = AtomicUsize::new(0);
    let _ = executor
        .execute_with_retry("openai", "chat", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RawFailure::network("connection reset")) }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn classified_error_keeps_raw_source() {
    let clock = ManualClock::new();
    let executor = RateLimitedExecutor::builder()
        .clock(clock.clone())
        .sleeper(ManualSleeper::new(clock))
        .retry_policy(quick_policy(0))
        .build();

    let err = executor
        .execute_with_retry("instagram", "profile", || async {
            Err::<(), _>(RawFailure::http(404, "User not found"))
        })
        .await
        .unwrap_err();

    let source = std::error::Error::source(&err).map(|s| s.to_string());
    assert_eq!(source.as_deref(), Some("[404] User not found"));
    assert!(err.to_string().starts_with("instagram.profile failed (not_found)"));
}
