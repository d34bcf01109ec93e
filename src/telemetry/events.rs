use crate::classifier::ErrorKind;
use std::fmt;
use std::time::Duration;

/// States of a logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum RequestState {
    /// Accepted, admission not yet checked.
    Pending,
    /// Admission denied; suspended until the quota frees up.
    WaitingQuota,
    /// The provider call is in flight.
    Dispatched,
    Success,
    /// Failed with a retryable classification and retry budget left.
    FailedRetryable,
    /// Suspended between retries.
    WaitingBackoff,
    /// Failed for good: non-retryable, or out of retries.
    FailedTerminal,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "PENDING",
            RequestState::WaitingQuota => "WAITING_QUOTA",
            RequestState::Dispatched => "DISPATCHED",
            RequestState::Success => "SUCCESS",
            RequestState::FailedRetryable => "FAILED_RETRYABLE",
            RequestState::WaitingBackoff => "WAITING_BACKOFF",
            RequestState::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    /// Suspension states are the only ones that carry a wait.
    pub fn is_suspension(self) -> bool {
        matches!(self, RequestState::WaitingQuota | RequestState::WaitingBackoff)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Success | RequestState::FailedTerminal)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state transition of a governed request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GovernorEvent {
    pub provider: String,
    pub operation: String,
    /// 1-based attempt number within `execute_with_retry` (always 1 for plain `execute`).
    pub attempt: u32,
    pub state: RequestState,
    /// How long the request is about to be suspended, for suspension states.
    pub wait: Option<Duration>,
    /// Classification of the failure, for failure states.
    pub kind: Option<ErrorKind>,
}

impl GovernorEvent {
    pub fn new(provider: &str, operation: &str, attempt: u32, state: RequestState) -> Self {
        Self {
            provider: provider.to_string(),
            operation: operation.to_string(),
            attempt,
            state,
            wait: None,
            kind: None,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl fmt::Display for GovernorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} attempt={} {}", self.provider, self.operation, self.attempt, self.state)?;
        if let Some(wait) = self.wait {
            write!(f, " wait={}ms", wait.as_millis())?;
        }
        if let Some(kind) = self.kind {
            write!(f, " kind={kind}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_wait_and_kind() {
        let event = GovernorEvent::new("youtube", "search", 2, RequestState::WaitingBackoff)
            .with_wait(Duration::from_millis(1500))
            .with_kind(ErrorKind::RateLimit);
        assert_eq!(
            event.to_string(),
            "youtube.search attempt=2 WAITING_BACKOFF wait=1500ms kind=rate_limit"
        );
    }

    #[test]
    fn state_predicates() {
        assert!(RequestState::WaitingQuota.is_suspension());
        assert!(!RequestState::Dispatched.is_suspension());
        assert!(RequestState::FailedTerminal.is_terminal());
        assert!(!RequestState::FailedRetryable.is_terminal());
    }
}
