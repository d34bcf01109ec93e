//! Provider-specific refinements layered over the generic table.
//!
//! A refinement sees the normalized signal and the generic kind, and may replace the kind,
//! retryability and suggested action. Rules for a provider are evaluated in registration
//! order; the first one that applies wins.

use super::{ErrorKind, FailureSignal};
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&FailureSignal, ErrorKind) -> bool + Send + Sync>;

/// Reclassification rule bound to one provider name.
#[derive(Clone)]
pub struct ProviderRule {
    provider: String,
    applies: Predicate,
    kind: ErrorKind,
    retryable: bool,
    suggested_action: Option<String>,
}

impl fmt::Debug for ProviderRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRule")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("retryable", &self.retryable)
            .field("suggested_action", &self.suggested_action)
            .field("applies", &"<predicate>")
            .finish()
    }
}

impl ProviderRule {
    /// Reclassify failures of `provider` to `kind` when `applies` holds. Retryability defaults
    /// to the kind's default.
    pub fn new<F>(provider: impl Into<String>, kind: ErrorKind, applies: F) -> Self
    where
        F: Fn(&FailureSignal, ErrorKind) -> bool + Send + Sync + 'static,
    {
        Self {
            provider: provider.into().to_ascii_lowercase(),
            applies: Arc::new(applies),
            kind,
            retryable: kind.is_retryable_by_default(),
            suggested_action: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn suggest(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn matches(&self, provider: &str, signal: &FailureSignal, generic: ErrorKind) -> bool {
        self.provider == provider && (self.applies)(signal, generic)
    }

    pub(crate) fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub(crate) fn action(&self) -> Option<&str> {
        self.suggested_action.as_deref()
    }
}

/// Built-in refinements for the providers the application integrates with.
pub fn builtin_rules() -> Vec<ProviderRule> {
    let mut rules = Vec::new();

    // Video platform: structural quota and unavailable media.
    rules.push(
        ProviderRule::new("youtube", ErrorKind::QuotaExceeded, |s, _| {
            s.contains_any(&["quotaexceeded", "dailylimitexceeded"])
        })
        .suggest("YouTube API daily quota exhausted; wait for the Pacific-midnight reset."),
    );
    rules.push(
        ProviderRule::new("youtube", ErrorKind::Forbidden, |s, _| {
            s.contains_any(&["private", "deleted", "video unavailable"])
        })
        .suggest("The video is private or was deleted; remove it from tracking."),
    );

    // Scraping marketplaces: plan limits surface as validation-looking errors.
    for provider in ["rapidapi", "apify"] {
        rules.push(
            ProviderRule::new(provider, ErrorKind::QuotaExceeded, |s, _| {
                s.contains_any(&["subscription", "not subscribed", "monthly quota"])
            })
            .suggest("The API subscription plan limit was reached; upgrade or wait for renewal."),
        );
    }

    // Completion APIs.
    for provider in ["openai", "anthropic"] {
        rules.push(
            ProviderRule::new(provider, ErrorKind::QuotaExceeded, |s, _| {
                s.contains_any(&["insufficient_quota", "billing", "credit balance"])
            })
            .suggest("Account credits are exhausted; top up billing for this provider."),
        );
        rules.push(
            ProviderRule::new(provider, ErrorKind::ServerError, |s, _| {
                s.status == Some(529) || s.contains("overloaded")
            })
            .suggest("The model is overloaded; the request will be retried."),
        );
        rules.push(
            ProviderRule::new(provider, ErrorKind::Validation, |s, _| {
                s.contains_any(&["context length", "context_length", "maximum context"])
            })
            .suggest("Shorten the input; it exceeds the model's context window."),
        );
    }

    // Social platforms: session walls and private profiles.
    for provider in ["instagram", "tiktok"] {
        rules.push(
            ProviderRule::new(provider, ErrorKind::Authentication, |s, _| {
                s.contains_any(&["login required", "checkpoint"])
            })
            .suggest("The session expired or hit a checkpoint; re-authenticate the account."),
        );
        rules.push(
            ProviderRule::new(provider, ErrorKind::Forbidden, |s, generic| {
                generic != ErrorKind::Authentication && s.contains("private")
            })
            .suggest("The account is private; its content cannot be fetched."),
        );
    }

    rules
}
