//! Raw provider failures as the engine sees them.
//!
//! Provider integrations keep their own error types; the engine only needs three signals from
//! them, exposed through [`ProviderFailure`]: an HTTP-like status, a retry directive, and whether
//! the failure happened below HTTP (connection or timeout). [`RawFailure`] is the normalized form
//! the classifier works on, and is also usable directly as a provider error type.

use std::fmt;

/// Failures that never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Transport {
    /// Connection refused/reset, DNS failure, broken pipe.
    Network,
    /// The provider call's own timeout fired.
    Timeout,
}

/// Signals the engine reads from a provider error.
pub trait ProviderFailure: std::error::Error + Send + Sync + 'static {
    /// HTTP-like status code, when the failure carried a response.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Raw `Retry-After` directive (seconds, milliseconds, or HTTP-date).
    fn retry_after(&self) -> Option<String> {
        None
    }

    /// Set when the failure happened below the HTTP layer.
    fn transport(&self) -> Option<Transport> {
        None
    }

    /// True when the failure is an upstream throttling signal that a throttle lane should absorb:
    /// 429, any 5xx, or a transport failure.
    fn is_throttle_signal(&self) -> bool {
        self.transport().is_some() || matches!(self.status(), Some(429) | Some(500..=599))
    }
}

/// Normalized failure record: message, optional status, optional retry directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFailure {
    message: String,
    status: Option<u16>,
    retry_after: Option<String>,
    transport: Option<Transport>,
}

impl RawFailure {
    /// A failure described only by its message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), status: None, retry_after: None, transport: None }
    }

    /// A failure carrying an HTTP-like status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), ..Self::new(message) }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self { transport: Some(Transport::Network), ..Self::new(message) }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { transport: Some(Transport::Timeout), ..Self::new(message) }
    }

    pub fn with_retry_after(mut self, directive: impl Into<String>) -> Self {
        self.retry_after = Some(directive.into());
        self
    }

    /// Normalize any provider error. The message includes the `source()` chain so pattern
    /// rules can see wrapped causes.
    pub fn capture<E: ProviderFailure + ?Sized>(error: &E) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.is_empty() && !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        Self {
            message,
            status: error.status(),
            retry_after: error.retry_after(),
            transport: error.transport(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status
    }

    pub fn retry_directive(&self) -> Option<&str> {
        self.retry_after.as_deref()
    }

    pub fn transport_kind(&self) -> Option<Transport> {
        self.transport
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{}] {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RawFailure {}

impl ProviderFailure for RawFailure {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn retry_after(&self) -> Option<String> {
        self.retry_after.clone()
    }

    fn transport(&self) -> Option<Transport> {
        self.transport
    }
}

impl ProviderFailure for std::io::Error {
    fn transport(&self) -> Option<Transport> {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut => Some(Transport::Timeout),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable
            | ErrorKind::UnexpectedEof => Some(Transport::Network),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("fetch failed")]
    struct Wrapped {
        #[source]
        cause: io::Error,
    }

    impl ProviderFailure for Wrapped {}

    #[test]
    fn throttle_signal_covers_429_5xx_and_transport() {
        assert!(RawFailure::http(429, "slow down").is_throttle_signal());
        assert!(RawFailure::http(503, "unavailable").is_throttle_signal());
        assert!(RawFailure::network("reset").is_throttle_signal());
        assert!(RawFailure::timeout("deadline").is_throttle_signal());
        assert!(!RawFailure::http(404, "missing").is_throttle_signal());
        assert!(!RawFailure::new("odd").is_throttle_signal());
    }

    #[test]
    fn capture_includes_source_chain() {
        let err = Wrapped { cause: io::Error::new(io::ErrorKind::Other, "socket hang up") };
        let raw = RawFailure::capture(&err);
        assert_eq!(raw.message(), "fetch failed: socket hang up");
        assert_eq!(raw.status_code(), None);
    }

    #[test]
    fn io_errors_map_to_transport() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "took too long");
        assert_eq!(timeout.transport(), Some(Transport::Timeout));
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(reset.transport(), Some(Transport::Network));
        let other = io::Error::new(io::ErrorKind::Other, "disk full");
        assert_eq!(other.transport(), None);
    }

    #[test]
    fn display_prefixes_status() {
        let raw = RawFailure::http(401, "bad key").with_retry_after("30");
        assert_eq!(raw.to_string(), "[401] bad key");
        assert_eq!(raw.retry_directive(), Some("30"));
    }
}
