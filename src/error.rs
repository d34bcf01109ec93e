//! Error types surfaced by the executor and builders.

use crate::backoff::BackoffError;
use crate::classifier::{ClassifiedError, ErrorKind};
use std::time::Duration;

/// Failure of a governed call.
///
/// `execute` reports the provider's own error as [`Inner`](GovernorError::Inner);
/// `execute_with_retry` reports the last classified error together with the raw failure it was
/// derived from, so the root cause survives exhausted retries.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError<E> {
    /// No rate limit configuration is installed for the provider and strict mode is on.
    /// Raised before any call is attempted.
    #[error("provider '{provider}' is not configured")]
    NotConfigured { provider: String },
    /// Classified failure that was either non-retryable or the last of the retry budget.
    #[error("{error}")]
    Classified {
        error: ClassifiedError,
        #[source]
        source: E,
    },
    /// The operation's own failure, unclassified.
    #[error(transparent)]
    Inner(E),
}

impl<E> GovernorError<E> {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    /// The classified record, when the failure went through the classifier.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Classified { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(|e| e.kind)
    }

    /// Action text to show the user verbatim, if the classifier produced one.
    pub fn suggested_action(&self) -> Option<&str> {
        self.classified().and_then(|e| e.suggested_action.as_deref())
    }

    /// Borrow the raw provider failure, if any.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) | Self::Classified { source: e, .. } => Some(e),
            Self::NotConfigured { .. } => None,
        }
    }

    /// Take the raw provider failure, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) | Self::Classified { source: e, .. } => Some(e),
            Self::NotConfigured { .. } => None,
        }
    }
}

/// Invalid builder input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("max_delay ({max:?}) must be >= base_delay ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
    #[error("backoff multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
    #[error("throttle lanes need at least one attempt")]
    ZeroAttempts,
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}
