//! Abstraction for sleeping/waiting
//!
//! Every suspension point in the engine (quota wait, lane spacing, retry backoff) goes through a
//! [`Sleeper`], so tests can run on fake time.

use crate::clock::ManualClock;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstraction for sleeping/waiting
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production sleeper using tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test sleeper that doesn't actually sleep
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

fn lock_calls(calls: &Mutex<Vec<Duration>>) -> std::sync::MutexGuard<'_, Vec<Duration>> {
    calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test sleeper that advances a [`ManualClock`] instead of waiting.
///
/// Sleeps complete immediately, but the shared clock moves forward by the requested duration, so
/// windows age out and lane spacing is satisfied exactly as it would be in real time.
#[derive(Debug, Clone)]
pub struct ManualSleeper {
    clock: ManualClock,
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl ManualSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn calls(&self) -> Vec<Duration> {
        lock_calls(&self.calls).clone()
    }

    /// Total fake time spent sleeping.
    pub fn total(&self) -> Duration {
        lock_calls(&self.calls).iter().sum()
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        lock_calls(&self.calls).push(duration);
        self.clock.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
