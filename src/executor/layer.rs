//! Tower integration: wrap any provider client service in the executor.

use super::{RateLimitedExecutor, RetryPolicy};
use crate::error::GovernorError;
use crate::failure::ProviderFailure;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Layer that routes every request of the wrapped service through
/// [`RateLimitedExecutor::execute_with_retry`] under one resource key.
///
/// Requests must be `Clone`: each retry sends a fresh copy to a fresh clone of the inner
/// service.
#[derive(Debug, Clone)]
pub struct GovernorLayer {
    executor: RateLimitedExecutor,
    key: String,
    operation: String,
    policy: Option<RetryPolicy>,
}

impl GovernorLayer {
    pub fn new(
        executor: RateLimitedExecutor,
        key: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self { executor, key: key.into(), operation: operation.into(), policy: None }
    }

    /// Use `policy` instead of the key's effective retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl<S> Layer<S> for GovernorLayer {
    type Service = GovernorService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GovernorService {
            inner: service,
            executor: self.executor.clone(),
            key: self.key.clone(),
            operation: self.operation.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Service produced by [`GovernorLayer`].
#[derive(Debug, Clone)]
pub struct GovernorService<S> {
    inner: S,
    executor: RateLimitedExecutor,
    key: String,
    operation: String,
    policy: Option<RetryPolicy>,
}

impl<S, Req> Service<Req> for GovernorService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    S::Error: ProviderFailure,
    Req: Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = GovernorError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GovernorError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let executor = self.executor.clone();
        let key = self.key.clone();
        let operation = self.operation.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let op = move || inner.clone().oneshot(req.clone());
            match policy {
                Some(policy) => executor.execute_with_policy(&key, &operation, &policy, op).await,
                None => executor.execute_with_retry(&key, &operation, op).await,
            }
        })
    }
}
