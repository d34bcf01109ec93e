//! `Retry-After` directive parsing.
//!
//! Upstreams disagree on the unit, so a bare number is interpreted by magnitude: values above
//! [`MILLIS_THRESHOLD`] are already milliseconds, anything else is seconds. Non-numeric values
//! are parsed as an HTTP-date (RFC 2822 / IMF-fixdate) relative to `now`.
//!
//! ```rust
//! use callgate::retry_after::parse_retry_after;
//! use std::time::Duration;
//!
//! assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
//! assert_eq!(parse_retry_after("5000"), Some(Duration::from_millis(5000)));
//! assert_eq!(parse_retry_after("soon"), None);
//! ```

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Numeric directives strictly greater than this are treated as milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1000.0;

/// Parse a directive against the current wall clock.
///
/// Returns `None` when there is no usable delay: empty or unparsable input, negative numbers,
/// zero, or a date that is not in the future.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// Parse a directive relative to an explicit `now` (deterministic for tests).
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(number) = trimmed.parse::<f64>() {
        if !number.is_finite() || number <= 0.0 {
            return None;
        }
        let millis = if number > MILLIS_THRESHOLD { number } else { number * 1000.0 };
        return Some(Duration::from_millis(millis.round() as u64));
    }

    let target = DateTime::parse_from_rfc2822(trimmed).ok()?.with_timezone(&Utc);
    let delta = target.signed_duration_since(now);
    let millis = delta.num_milliseconds();
    if millis <= 0 {
        tracing::debug!(target: "callgate::retry_after", value = trimmed, "retry-after date already passed");
        return None;
    }
    Some(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn small_numbers_are_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_millis(120_000)));
        assert_eq!(parse_retry_after(" 1 "), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after("1000"), Some(Duration::from_secs(1000)));
    }

    #[test]
    fn large_numbers_are_milliseconds() {
        assert_eq!(parse_retry_after("5000"), Some(Duration::from_millis(5000)));
        assert_eq!(parse_retry_after("1001"), Some(Duration::from_millis(1001)));
    }

    #[test]
    fn fractional_seconds_are_rounded_to_millis() {
        assert_eq!(parse_retry_after("1.5"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn http_date_in_future_becomes_delay() {
        let now = fixed_now();
        let delay = parse_retry_after_at("Fri, 14 Mar 2025 12:00:10 GMT", now);
        assert_eq!(delay, Some(Duration::from_secs(10)));
    }

    #[test]
    fn http_date_relative_to_wall_clock_is_close() {
        let future = Utc::now() + chrono::Duration::seconds(10);
        let header = future.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let delay = parse_retry_after(&header).expect("future date yields a delay");
        assert!(delay <= Duration::from_secs(10));
        assert!(delay >= Duration::from_secs(8));
    }

    #[test]
    fn past_date_is_unusable() {
        let now = fixed_now();
        assert_eq!(parse_retry_after_at("Fri, 14 Mar 2025 11:59:00 GMT", now), None);
    }

    #[test]
    fn garbage_zero_and_negative_are_unusable() {
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("later"), None);
        assert_eq!(parse_retry_after("0"), None);
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("NaN"), None);
    }
}
