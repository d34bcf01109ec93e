//! Generic classification table, evaluated top to bottom; the first matching rule wins.

use super::{ErrorKind, FailureSignal};

/// One row of the generic table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub matches: fn(&FailureSignal) -> bool,
    pub kind: ErrorKind,
    pub retryable: bool,
    pub suggested_action: &'static str,
}

fn authentication(s: &FailureSignal) -> bool {
    s.status == Some(401)
        || s.contains_any(&["unauthorized", "invalid api key", "invalid_api_key", "api key not valid"])
}

fn rate_limit(s: &FailureSignal) -> bool {
    s.status == Some(429) || s.contains_any(&["rate limit", "ratelimit", "too many requests"])
}

fn quota_exceeded(s: &FailureSignal) -> bool {
    s.contains_any(&["quota exceeded", "usage limit"])
}

fn not_found(s: &FailureSignal) -> bool {
    s.status == Some(404) || s.contains("not found")
}

fn forbidden(s: &FailureSignal) -> bool {
    s.status == Some(403) || s.contains_any(&["forbidden", "access denied"])
}

fn timeout(s: &FailureSignal) -> bool {
    s.transport == Some(crate::Transport::Timeout)
        || s.status == Some(408)
        || s.contains_any(&["timeout", "timed out", "etimedout", "deadline exceeded"])
}

fn network(s: &FailureSignal) -> bool {
    s.transport == Some(crate::Transport::Network)
        || s.contains_any(&[
            "network",
            "connection",
            "econnrefused",
            "econnreset",
            "enotfound",
            "socket hang up",
            "fetch failed",
            "dns",
        ])
}

fn server_error(s: &FailureSignal) -> bool {
    matches!(s.status, Some(500..=599)) || s.contains_any(&["server error", "internal error"])
}

fn parsing(s: &FailureSignal) -> bool {
    s.contains_any(&["unexpected token", "json parse", "failed to parse", "deserializ"])
}

fn validation(s: &FailureSignal) -> bool {
    s.status == Some(400)
        || s.status == Some(422)
        || s.contains_any(&["invalid", "validation", "malformed"])
}

/// The generic table in priority order.
pub static GENERIC_RULES: &[Rule] = &[
    Rule {
        name: "authentication",
        matches: authentication,
        kind: ErrorKind::Authentication,
        retryable: false,
        suggested_action: "Check the API key or credentials configured for this provider.",
    },
    Rule {
        name: "rate_limit",
        matches: rate_limit,
        kind: ErrorKind::RateLimit,
        retryable: true,
        suggested_action: "Wait for the rate limit window to reset before retrying.",
    },
    Rule {
        name: "quota_exceeded",
        matches: quota_exceeded,
        kind: ErrorKind::QuotaExceeded,
        retryable: false,
        suggested_action: "Quota exhausted; upgrade the plan or wait for the quota period to reset.",
    },
    Rule {
        name: "not_found",
        matches: not_found,
        kind: ErrorKind::NotFound,
        retryable: false,
        suggested_action: "Verify the requested resource identifier.",
    },
    Rule {
        name: "forbidden",
        matches: forbidden,
        kind: ErrorKind::Forbidden,
        retryable: false,
        suggested_action: "The configured credentials lack access to this resource.",
    },
    Rule {
        name: "timeout",
        matches: timeout,
        kind: ErrorKind::Timeout,
        retryable: true,
        suggested_action: "The provider did not respond in time; the request will be retried.",
    },
    Rule {
        name: "network",
        matches: network,
        kind: ErrorKind::Network,
        retryable: true,
        suggested_action: "Check network connectivity; the request will be retried.",
    },
    Rule {
        name: "server_error",
        matches: server_error,
        kind: ErrorKind::ServerError,
        retryable: true,
        suggested_action: "The provider is having problems; the request will be retried.",
    },
    Rule {
        name: "parsing",
        matches: parsing,
        kind: ErrorKind::Parsing,
        retryable: false,
        suggested_action: "The provider returned a response in an unexpected format.",
    },
    Rule {
        name: "validation",
        matches: validation,
        kind: ErrorKind::Validation,
        retryable: false,
        suggested_action: "Fix the request parameters before retrying.",
    },
];

/// Outcome when nothing in the table matches.
pub const FALLBACK_ACTION: &str = "Unexpected error; retry later or contact the provider.";

/// First matching generic rule, if any.
pub fn first_match(signal: &FailureSignal) -> Option<&'static Rule> {
    GENERIC_RULES.iter().find(|rule| (rule.matches)(signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawFailure;

    fn kind_of(raw: RawFailure) -> Option<ErrorKind> {
        first_match(&FailureSignal::from_raw(&raw)).map(|r| r.kind)
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(kind_of(RawFailure::http(401, "")), Some(ErrorKind::Authentication));
        assert_eq!(kind_of(RawFailure::http(429, "")), Some(ErrorKind::RateLimit));
        assert_eq!(kind_of(RawFailure::http(404, "")), Some(ErrorKind::NotFound));
        assert_eq!(kind_of(RawFailure::http(403, "")), Some(ErrorKind::Forbidden));
        assert_eq!(kind_of(RawFailure::http(500, "")), Some(ErrorKind::ServerError));
        assert_eq!(kind_of(RawFailure::http(502, "")), Some(ErrorKind::ServerError));
    }

    #[test]
    fn priority_order_resolves_overlaps() {
        // 401 beats the "invalid" validation phrase.
        assert_eq!(
            kind_of(RawFailure::http(401, "invalid request")),
            Some(ErrorKind::Authentication)
        );
        // rate_limit beats quota_exceeded when both phrases appear.
        assert_eq!(
            kind_of(RawFailure::new("rate limit hit: quota exceeded")),
            Some(ErrorKind::RateLimit)
        );
        // timeout beats network for "connection timed out".
        assert_eq!(kind_of(RawFailure::new("connection timed out")), Some(ErrorKind::Timeout));
    }

    #[test]
    fn phrases_match_case_insensitively() {
        assert_eq!(kind_of(RawFailure::new("Too Many Requests")), Some(ErrorKind::RateLimit));
        assert_eq!(kind_of(RawFailure::new("Usage limit reached")), Some(ErrorKind::QuotaExceeded));
        assert_eq!(kind_of(RawFailure::new("ECONNRESET")), Some(ErrorKind::Network));
        assert_eq!(kind_of(RawFailure::new("Malformed payload")), Some(ErrorKind::Validation));
        assert_eq!(
            kind_of(RawFailure::new("Unexpected token < in JSON")),
            Some(ErrorKind::Parsing)
        );
    }

    #[test]
    fn transport_flags_match_without_phrases() {
        assert_eq!(kind_of(RawFailure::network("boom")), Some(ErrorKind::Network));
        assert_eq!(kind_of(RawFailure::timeout("boom")), Some(ErrorKind::Timeout));
    }

    #[test]
    fn unmatched_failure_has_no_rule() {
        assert_eq!(kind_of(RawFailure::new("something odd happened")), None);
    }
}
