//! Quota tracking.
//!
//! This module provides the admission side of the engine:
//! - [`QuotaTracker`]: per-resource-key buckets answering "may this call go now, and if not,
//!   how long until it may".
//! - [`RateLimitConfig`]: the windows (second/minute/hour/day) and burst capacity of a provider.
//! - [`RateLimitStatus`]: the admission decision, with a computed [`QuotaWindow`] per window.
//!
//! # Architecture
//!
//! - **Config**: `config` resolves a resource key to its config (exact key, then provider
//!   prefix, then the fallback) and supports hot swapping.
//! - **Bucket**: `bucket` owns the request log and burst tokens of one key and does the math.
//! - **Tracker**: `tracker` owns the key -> bucket map and the single-writer discipline: every
//!   read-modify-write of a bucket happens under that bucket's mutex.

use std::fmt;
use std::time::Duration;

pub mod bucket;
pub mod config;
pub mod tracker;

pub use bucket::Bucket;
pub use config::{ConfigRegistry, RateLimitConfig, RateLimitConfigPatch};
pub use tracker::{QuotaTracker, DEFAULT_RETENTION};

/// Window granularities, shortest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WindowKind {
    Second,
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub const ALL: [WindowKind; 4] =
        [WindowKind::Second, WindowKind::Minute, WindowKind::Hour, WindowKind::Day];

    pub fn length(self) -> Duration {
        Duration::from_millis(self.length_millis())
    }

    pub fn length_millis(self) -> u64 {
        match self {
            WindowKind::Second => 1_000,
            WindowKind::Minute => 60_000,
            WindowKind::Hour => 3_600_000,
            WindowKind::Day => 86_400_000,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WindowKind::Second => "second",
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        };
        f.write_str(name)
    }
}

/// Read-only view of one window, computed at check time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuotaWindow {
    pub window: WindowKind,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window frees a slot: when exhausted, the wait until admission is possible
    /// again; otherwise until the oldest counted request ages out (zero for an empty window).
    pub reset_in: Duration,
    /// True when this window is enforced by the burst token bucket rather than a count.
    pub burst: bool,
}

/// Why admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DenialReason {
    WindowExceeded(WindowKind),
    BurstExhausted,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::WindowExceeded(window) => write!(f, "{window} window exceeded"),
            DenialReason::BurstExhausted => f.write_str("burst exhausted"),
        }
    }
}

/// The admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub quotas: Vec<QuotaWindow>,
    /// Set when denied: how long the caller must wait before asking again.
    pub retry_after: Option<Duration>,
    pub reason: Option<DenialReason>,
}

impl RateLimitStatus {
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// The view of a single window, if configured.
    pub fn window(&self, kind: WindowKind) -> Option<&QuotaWindow> {
        self.quotas.iter().find(|q| q.window == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_ordered_shortest_first() {
        let lengths: Vec<u64> = WindowKind::ALL.iter().map(|w| w.length_millis()).collect();
        let mut sorted = lengths.clone();
        sorted.sort_unstable();
        assert_eq!(lengths, sorted);
        assert_eq!(WindowKind::Day.length(), Duration::from_secs(86_400));
    }

    #[test]
    fn denial_reason_display() {
        assert_eq!(
            DenialReason::WindowExceeded(WindowKind::Minute).to_string(),
            "minute window exceeded"
        );
        assert_eq!(DenialReason::BurstExhausted.to_string(), "burst exhausted");
    }
}
