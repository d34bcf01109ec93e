//! Error classification.
//!
//! Maps a raw provider failure to a [`ClassifiedError`] in two steps:
//! 1. the generic table in [`rules`] (first match wins, unmatched failures are `Unknown` and
//!    retryable);
//! 2. provider refinements in [`providers`], which may reclassify or annotate.
//!
//! The classifier also keeps observational diagnostics (counts per `(provider, kind)`, the last
//! error per `(provider, operation)`, a bounded ring of recent errors). Diagnostics never feed
//! back into classification.

pub mod providers;
pub mod rules;

pub use providers::{builtin_rules, ProviderRule};
pub use rules::{Rule, GENERIC_RULES};

use crate::failure::{ProviderFailure, RawFailure, Transport};
use crate::retry_after::parse_retry_after;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

/// Default capacity of the recent-errors ring.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    QuotaExceeded,
    NotFound,
    Forbidden,
    Validation,
    Network,
    Timeout,
    ServerError,
    Parsing,
    Unknown,
}

impl ErrorKind {
    /// Retryability when no rule says otherwise. `Unknown` is retryable so transient oddities
    /// are not dropped.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::ServerError
                | ErrorKind::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized view the rules match against: lowercase message, status, transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignal {
    pub status: Option<u16>,
    pub message: String,
    pub transport: Option<Transport>,
}

impl FailureSignal {
    pub fn from_raw(raw: &RawFailure) -> Self {
        Self {
            status: raw.status_code(),
            message: raw.message().to_lowercase(),
            transport: raw.transport_kind(),
        }
    }

    /// `needle` must be lowercase.
    pub fn contains(&self, needle: &str) -> bool {
        self.message.contains(needle)
    }

    pub fn contains_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.message.contains(n))
    }
}

/// The engine's normalized failure record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassifiedError {
    pub provider: String,
    pub operation: String,
    pub kind: ErrorKind,
    /// Status code rendered as text, when the failure carried one.
    pub code: Option<String>,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub suggested_action: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Option<BTreeMap<String, String>>,
}

impl ClassifiedError {
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} failed ({}): {}", self.provider, self.operation, self.kind, self.message)?;
        if let Some(action) = &self.suggested_action {
            write!(f, "; {}", action)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}

#[derive(Debug, Default)]
struct Diagnostics {
    counts: HashMap<(String, ErrorKind), u64>,
    last: HashMap<(String, String), ClassifiedError>,
    recent: VecDeque<ClassifiedError>,
}

/// Classifies provider failures and keeps diagnostics about them.
#[derive(Debug)]
pub struct ErrorClassifier {
    provider_rules: RwLock<Vec<ProviderRule>>,
    diagnostics: Mutex<Diagnostics>,
    recent_capacity: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier with the built-in provider refinements.
    pub fn new() -> Self {
        Self::with_rules(builtin_rules())
    }

    /// Classifier with an explicit refinement list (empty for generic-only).
    pub fn with_rules(rules: Vec<ProviderRule>) -> Self {
        Self {
            provider_rules: RwLock::new(rules),
            diagnostics: Mutex::new(Diagnostics::default()),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity.max(1);
        self
    }

    /// Append a refinement; it is evaluated after the existing rules for its provider.
    pub fn register_rule(&self, rule: ProviderRule) {
        self.provider_rules.write().unwrap_or_else(|p| p.into_inner()).push(rule);
    }

    /// Classify a provider error.
    pub fn classify<E: ProviderFailure + ?Sized>(
        &self,
        provider: &str,
        operation: &str,
        failure: &E,
    ) -> ClassifiedError {
        self.classify_raw(provider, operation, &RawFailure::capture(failure), None)
    }

    /// Classify an already-normalized failure, attaching optional context.
    pub fn classify_raw(
        &self,
        provider: &str,
        operation: &str,
        raw: &RawFailure,
        context: Option<BTreeMap<String, String>>,
    ) -> ClassifiedError {
        let signal = FailureSignal::from_raw(raw);
        let (mut kind, mut retryable, mut action) = match rules::first_match(&signal) {
            Some(rule) => (rule.kind, rule.retryable, Some(rule.suggested_action.to_string())),
            None => (ErrorKind::Unknown, true, Some(rules::FALLBACK_ACTION.to_string())),
        };

        let provider_key = provider_name(provider);
        {
            let refinements = self.provider_rules.read().unwrap_or_else(|p| p.into_inner());
            if let Some(rule) =
                refinements.iter().find(|rule| rule.matches(&provider_key, &signal, kind))
            {
                tracing::debug!(
                    target: "callgate::classifier",
                    provider,
                    from = %kind,
                    to = %rule.kind(),
                    "provider refinement applied"
                );
                kind = rule.kind();
                retryable = rule.is_retryable();
                if let Some(a) = rule.action() {
                    action = Some(a.to_string());
                }
            }
        }

        let retry_after = if retryable { raw.retry_directive().and_then(parse_retry_after) } else { None };

        let classified = ClassifiedError {
            provider: provider.to_string(),
            operation: operation.to_string(),
            kind,
            code: raw.status_code().map(|s| s.to_string()),
            message: raw.message().to_string(),
            retryable,
            retry_after,
            suggested_action: action,
            timestamp: Utc::now(),
            context,
        };
        self.observe(&classified);
        classified
    }

    fn diagnostics(&self) -> MutexGuard<'_, Diagnostics> {
        self.diagnostics.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn observe(&self, error: &ClassifiedError) {
        let mut diag = self.diagnostics();
        *diag.counts.entry((error.provider.clone(), error.kind)).or_insert(0) += 1;
        diag.last.insert((error.provider.clone(), error.operation.clone()), error.clone());
        diag.recent.push_back(error.clone());
        while diag.recent.len() > self.recent_capacity {
            diag.recent.pop_front();
        }
    }

    /// Number of failures of `kind` seen for `provider`.
    pub fn error_count(&self, provider: &str, kind: ErrorKind) -> u64 {
        self.diagnostics().counts.get(&(provider.to_string(), kind)).copied().unwrap_or(0)
    }

    /// All counters, sorted by provider then kind.
    pub fn counts(&self) -> Vec<(String, ErrorKind, u64)> {
        let mut out: Vec<_> =
            self.diagnostics().counts.iter().map(|((p, k), n)| (p.clone(), *k, *n)).collect();
        out.sort();
        out
    }

    pub fn last_error(&self, provider: &str, operation: &str) -> Option<ClassifiedError> {
        self.diagnostics().last.get(&(provider.to_string(), operation.to_string())).cloned()
    }

    /// Recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<ClassifiedError> {
        self.diagnostics().recent.iter().cloned().collect()
    }

    pub fn clear_diagnostics(&self) {
        *self.diagnostics() = Diagnostics::default();
    }
}

/// Provider component of a resource key (`"youtube:search"` -> `"youtube"`), lowercased.
pub fn provider_name(key: &str) -> String {
    key.split(':').next().unwrap_or(key).trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic() -> ErrorClassifier {
        ErrorClassifier::with_rules(Vec::new())
    }

    #[test]
    fn status_codes_are_deterministic() {
        let c = generic();
        let cases = [
            (401, ErrorKind::Authentication, false),
            (429, ErrorKind::RateLimit, true),
            (404, ErrorKind::NotFound, false),
            (500, ErrorKind::ServerError, true),
        ];
        for (status, kind, retryable) in cases {
            let e = c.classify("svc", "op", &RawFailure::http(status, "boom"));
            assert_eq!(e.kind, kind, "status {status}");
            assert_eq!(e.retryable, retryable, "status {status}");
            assert_eq!(e.code.as_deref(), Some(status.to_string().as_str()));
        }
    }

    #[test]
    fn unmatched_failure_is_unknown_and_retryable() {
        let e = generic().classify("svc", "op", &RawFailure::new("the flux capacitor broke"));
        assert_eq!(e.kind, ErrorKind::Unknown);
        assert!(e.retryable);
        assert!(e.suggested_action.is_some());
    }

    #[test]
    fn rate_limit_extracts_retry_after() {
        let e = generic().classify(
            "svc",
            "op",
            &RawFailure::http(429, "slow down").with_retry_after("120"),
        );
        assert_eq!(e.retry_after, Some(Duration::from_secs(120)));
        assert_eq!(e.retry_after_ms(), Some(120_000));
    }

    #[test]
    fn non_retryable_kinds_drop_retry_after() {
        let e = generic().classify("svc", "op", &RawFailure::http(401, "no").with_retry_after("5"));
        assert_eq!(e.retry_after, None);
    }

    #[test]
    fn subscription_errors_are_reclassified_for_marketplaces() {
        let c = ErrorClassifier::new();
        let raw = RawFailure::http(400, "Invalid request: subscription required");
        assert_eq!(c.classify("svc", "op", &raw).kind, ErrorKind::Validation);

        let refined = c.classify("rapidapi:tiktok-scraper", "fetch", &raw);
        assert_eq!(refined.kind, ErrorKind::QuotaExceeded);
        assert!(!refined.retryable);
    }

    #[test]
    fn deleted_video_is_forbidden_with_action() {
        let e = ErrorClassifier::new().classify(
            "youtube",
            "videos.list",
            &RawFailure::http(404, "Video has been deleted"),
        );
        assert_eq!(e.kind, ErrorKind::Forbidden);
        assert!(!e.retryable);
        assert!(e.suggested_action.unwrap().contains("private or was deleted"));
    }

    #[test]
    fn registered_rule_is_used() {
        let c = generic();
        c.register_rule(
            ProviderRule::new("acme", ErrorKind::RateLimit, |s, _| s.contains("slow lane"))
                .suggest("Back off."),
        );
        let e = c.classify("acme", "op", &RawFailure::new("You are in the slow lane"));
        assert_eq!(e.kind, ErrorKind::RateLimit);
        assert!(e.retryable);
        assert_eq!(e.suggested_action.as_deref(), Some("Back off."));
    }

    #[test]
    fn diagnostics_track_counts_last_and_recent() {
        let c = generic().with_recent_capacity(2);
        c.classify("a", "x", &RawFailure::http(500, "one"));
        c.classify("a", "x", &RawFailure::http(503, "two"));
        c.classify("a", "y", &RawFailure::http(404, "three"));

        assert_eq!(c.error_count("a", ErrorKind::ServerError), 2);
        assert_eq!(c.error_count("a", ErrorKind::NotFound), 1);
        assert_eq!(c.last_error("a", "x").unwrap().message, "two");

        let recent = c.recent_errors();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "two");
        assert_eq!(recent[1].message, "three");

        c.clear_diagnostics();
        assert!(c.counts().is_empty());
        assert!(c.recent_errors().is_empty());
    }

    #[test]
    fn diagnostics_do_not_change_classification() {
        let c = generic();
        let raw = RawFailure::new("connection refused");
        let first = c.classify("p", "o", &raw);
        for _ in 0..10 {
            c.classify("p", "o", &raw);
        }
        let later = c.classify("p", "o", &raw);
        assert_eq!(first.kind, later.kind);
        assert_eq!(first.retryable, later.retryable);
    }

    #[test]
    fn provider_name_strips_operation() {
        assert_eq!(provider_name("YouTube:search"), "youtube");
        assert_eq!(provider_name("openai"), "openai");
    }
}
