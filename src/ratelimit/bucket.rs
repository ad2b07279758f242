//! Token bucket arithmetic for a single rate limit tier.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A rate limit permitting `max_tokens` events per `interval_seconds`.
///
/// `RateLimit::new(10, 100)` allows 10 events per 100 seconds. Several
/// tiers compose a limiter; admission requires all of them to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum tokens the bucket can hold.
    pub max_tokens: u32,
    /// Length of the refill window in seconds.
    pub interval_seconds: u32,
}

impl RateLimit {
    /// Create a new rate limit tier.
    pub const fn new(max_tokens: u32, interval_seconds: u32) -> Self {
        Self {
            max_tokens,
            interval_seconds,
        }
    }

    /// Tokens accrued per second at this tier's constant refill rate.
    pub fn tokens_per_second(&self) -> f64 {
        f64::from(self.max_tokens) / f64::from(self.interval_seconds)
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} per {}s", self.max_tokens, self.interval_seconds)
    }
}

/// One tier's bucket: the token balance as of `last_refill`.
///
/// Tokens are real-valued so that credit accrues fractionally between
/// calls; debits are whole events. This is the persisted representation,
/// with timestamps in UTC wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    /// The tier this bucket enforces.
    pub limit: RateLimit,
    /// Tokens in the bucket as of `last_refill`.
    pub tokens: f64,
    /// When tokens were last accrued.
    pub last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// Create an empty bucket for `limit`.
    pub fn new(limit: RateLimit, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            tokens: 0.0,
            last_refill: now,
        }
    }

    /// Accrue tokens for the time elapsed since the last refill.
    ///
    /// A `now` earlier than `last_refill` (clock skew, or a stale read)
    /// is a no-op, never an error. Accrual is capped at `max_tokens`: a
    /// partially filled bucket must not snap to capacity just because
    /// time has passed.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = now.signed_duration_since(self.last_refill);
        if elapsed < Duration::zero() {
            return;
        }
        let accrued = elapsed.as_seconds_f64() * self.limit.tokens_per_second();
        self.tokens = (self.tokens + accrued).min(f64::from(self.limit.max_tokens));
        self.last_refill = now;
    }

    /// Whether the bucket currently holds at least `tokens`.
    pub fn has_at_least(&self, tokens: f64) -> bool {
        self.tokens >= tokens
    }

    /// Remove `tokens` from the bucket.
    ///
    /// The caller must have refilled and checked `has_at_least` first;
    /// this does not re-check.
    pub fn debit(&mut self, tokens: f64) {
        self.tokens -= tokens;
    }

    /// Replace this bucket's limit.
    ///
    /// An identical limit is a no-op. A changed limit empties the bucket:
    /// accumulated credit does not carry across a quota change.
    pub fn reconfigure(&mut self, limit: RateLimit, now: DateTime<Utc>) {
        if limit == self.limit {
            return;
        }
        self.limit = limit;
        self.tokens = 0.0;
        self.last_refill = now;
    }
}
