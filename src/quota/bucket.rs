//! Request log and burst tokens for one resource key.
//!
//! A [`Bucket`] is plain data: it has no lock and no clock of its own. The tracker passes the
//! current time in and holds the bucket's mutex around every call, so the methods here can do
//! read-modify-write freely.

use super::{DenialReason, QuotaWindow, RateLimitConfig, RateLimitStatus, WindowKind};
use std::collections::VecDeque;
use std::time::Duration;

/// Entries older than this are purged by cleanup.
pub const LOG_HORIZON_MS: u64 = 86_400_000;
/// Cleanup runs at most this often per bucket.
pub const CLEANUP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Admitted, dispatch outcome not yet recorded.
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    at: u64,
    outcome: Outcome,
}

#[derive(Debug, Clone)]
struct BurstState {
    tokens: u32,
    capacity: u32,
    last_refill: u64,
}

impl BurstState {
    fn full(capacity: u32, now: u64) -> Self {
        Self { tokens: capacity, capacity, last_refill: now }
    }

    /// Adds one token per whole elapsed interval, capped at capacity.
    fn refill(&mut self, now: u64, interval_ms: u64) {
        if self.tokens >= self.capacity || interval_ms == 0 {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }
        let earned = now.saturating_sub(self.last_refill) / interval_ms;
        if earned == 0 {
            return;
        }
        let earned_tokens = u32::try_from(earned).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(earned_tokens).min(self.capacity);
        self.last_refill = if self.tokens == self.capacity {
            now
        } else {
            self.last_refill + earned * interval_ms
        };
    }

    fn next_token_in(&self, now: u64, interval_ms: u64) -> u64 {
        if self.tokens >= self.capacity {
            return 0;
        }
        (self.last_refill + interval_ms).saturating_sub(now)
    }

    fn take(&mut self) {
        self.tokens = self.tokens.saturating_sub(1);
    }
}

/// Per-key quota state.
#[derive(Debug, Clone)]
pub struct Bucket {
    log: VecDeque<Entry>,
    burst: Option<BurstState>,
    /// Count of `Pending` entries in `log`.
    pending: usize,
    last_cleanup: u64,
    last_activity: u64,
}

impl Bucket {
    pub fn new(now: u64) -> Self {
        Self { log: VecDeque::new(), burst: None, pending: 0, last_cleanup: now, last_activity: now }
    }

    /// Number of logged requests (pending or settled).
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Admitted requests whose outcome has not been recorded yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn successes(&self) -> usize {
        self.log.iter().filter(|e| e.outcome == Outcome::Succeeded).count()
    }

    pub fn failures(&self) -> usize {
        self.log.iter().filter(|e| e.outcome == Outcome::Failed).count()
    }

    /// Remaining burst tokens, if burst capacity is active for this bucket.
    pub fn burst_tokens(&self) -> Option<u32> {
        self.burst.as_ref().map(|b| b.tokens)
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Evaluate every configured window at `now` without reserving anything.
    pub fn evaluate(&mut self, now: u64, config: &RateLimitConfig) -> RateLimitStatus {
        self.cleanup(now);
        self.sync_burst(now, config);

        let mut quotas = Vec::with_capacity(4);
        let mut denial: Option<(Duration, DenialReason)> = None;
        let floor = config.retry_after_default;

        // Tokens refill at the steady rate; the second window lets a full burst through at once.
        let burst_window = self.burst.as_ref().map(|burst| {
            let interval = config.refill_interval();
            let reset_in = Duration::from_millis(burst.next_token_in(now, millis(interval)));
            if burst.tokens == 0 {
                // A zero wait would spin the caller; one interval is the upper bound anyway.
                let wait = if reset_in.is_zero() { interval } else { reset_in };
                note_denial(&mut denial, wait, DenialReason::BurstExhausted);
            }
            QuotaWindow {
                window: WindowKind::Second,
                limit: burst.capacity,
                remaining: burst.tokens,
                reset_in,
                burst: true,
            }
        });
        self.push_window(
            &mut quotas,
            &mut denial,
            now,
            WindowKind::Second,
            config.second_limit(),
            floor,
        );
        quotas.extend(burst_window);
        self.push_window(&mut quotas, &mut denial, now, WindowKind::Minute, config.per_minute, floor);
        if let Some(limit) = config.per_hour {
            self.push_window(&mut quotas, &mut denial, now, WindowKind::Hour, limit, floor);
        }
        if let Some(limit) = config.per_day {
            self.push_window(&mut quotas, &mut denial, now, WindowKind::Day, limit, floor);
        }

        RateLimitStatus {
            allowed: denial.is_none(),
            quotas,
            retry_after: denial.map(|(wait, _)| wait),
            reason: denial.map(|(_, reason)| reason),
        }
    }

    /// Count an admitted request as in flight. Called right after an allowing evaluation.
    pub fn reserve(&mut self, now: u64) {
        self.log.push_back(Entry { at: now, outcome: Outcome::Pending });
        self.pending += 1;
        if let Some(burst) = &mut self.burst {
            burst.take();
        }
        self.last_activity = now;
    }

    /// Record a dispatch outcome. Settles the oldest pending reservation when there is one,
    /// otherwise logs a new request and takes a burst token.
    pub fn record(&mut self, now: u64, success: bool, config: &RateLimitConfig) {
        let outcome = if success { Outcome::Succeeded } else { Outcome::Failed };
        self.last_activity = now;
        if self.pending > 0 {
            // Pending entries sit near the tail; the oldest is the last one met walking back.
            let mut seen = 0;
            for entry in self.log.iter_mut().rev() {
                if entry.outcome == Outcome::Pending {
                    seen += 1;
                    if seen == self.pending {
                        entry.outcome = outcome;
                        self.pending -= 1;
                        return;
                    }
                }
            }
        }
        self.sync_burst(now, config);
        self.log.push_back(Entry { at: now, outcome });
        if let Some(burst) = &mut self.burst {
            burst.take();
        }
    }

    /// Drop entries past the 24h horizon, at most once per minute unless `force` is set.
    pub fn cleanup_at(&mut self, now: u64, force: bool) -> usize {
        if !force && now.saturating_sub(self.last_cleanup) < CLEANUP_INTERVAL_MS {
            return 0;
        }
        self.last_cleanup = now;
        let before = self.log.len();
        while let Some(front) = self.log.front() {
            if now.saturating_sub(front.at) < LOG_HORIZON_MS {
                break;
            }
            if front.outcome == Outcome::Pending {
                self.pending -= 1;
            }
            self.log.pop_front();
        }
        before - self.log.len()
    }

    fn cleanup(&mut self, now: u64) {
        self.cleanup_at(now, false);
    }

    /// True when the bucket holds nothing and has not been touched for `retention`.
    pub fn is_idle(&self, now: u64, retention: Duration) -> bool {
        self.log.is_empty() && now.saturating_sub(self.last_activity) >= millis(retention)
    }

    fn sync_burst(&mut self, now: u64, config: &RateLimitConfig) {
        let Some(capacity) = config.burst_limit.filter(|limit| *limit > 0) else {
            self.burst = None;
            return;
        };
        let burst = self.burst.get_or_insert_with(|| BurstState::full(capacity, now));
        if burst.capacity != capacity {
            burst.capacity = capacity;
            burst.tokens = burst.tokens.min(capacity);
        }
        burst.refill(now, millis(config.refill_interval()));
    }

    fn push_window(
        &self,
        quotas: &mut Vec<QuotaWindow>,
        denial: &mut Option<(Duration, DenialReason)>,
        now: u64,
        window: WindowKind,
        limit: u32,
        floor: Duration,
    ) {
        if limit == 0 {
            return;
        }
        let length = window.length_millis();
        let mut used: u32 = 0;
        let mut oldest = None;
        // Once `limit` newer entries are in the window, the limit-th newest is the one whose
        // expiry frees a slot.
        let mut pivot = None;
        for entry in self.log.iter().rev() {
            if now.saturating_sub(entry.at) >= length {
                break;
            }
            used = used.saturating_add(1);
            oldest = Some(entry.at);
            if used == limit {
                pivot = Some(entry.at);
            }
        }

        let expires_in = |at: u64| Duration::from_millis((at + length).saturating_sub(now));
        let remaining = limit.saturating_sub(used);
        let reset_in = match (pivot, oldest) {
            (Some(at), _) => expires_in(at),
            (None, Some(at)) => expires_in(at),
            (None, None) => Duration::ZERO,
        };
        if remaining == 0 {
            note_denial(denial, reset_in.max(floor), DenialReason::WindowExceeded(window));
        }
        quotas.push(QuotaWindow { window, limit, remaining, reset_in, burst: false });
    }
}

/// Keep the denial with the longest wait; it is the binding one.
fn note_denial(slot: &mut Option<(Duration, DenialReason)>, wait: Duration, reason: DenialReason) {
    if slot.map_or(true, |(current, _)| wait > current) {
        *slot = Some((wait, reason));
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
