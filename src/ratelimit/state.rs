//! The persisted aggregate for one named limiter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::{RateLimit, TokenBucket};

/// Shared state for one named limiter: one bucket per configured tier
/// plus accept/reject totals for diagnostics.
///
/// Admission is the AND of all tiers: a request is granted only when
/// every bucket can cover it, and then every bucket is debited. Bucket
/// order matters only for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterState {
    /// Total requests granted since the state was created.
    pub accept_count: u64,
    /// Total requests denied since the state was created.
    pub reject_count: u64,
    /// One bucket per configured tier.
    pub buckets: Vec<TokenBucket>,
}

impl LimiterState {
    /// Fresh state with one empty bucket per tier.
    pub fn new(tiers: &[RateLimit], now: DateTime<Utc>) -> Self {
        Self {
            accept_count: 0,
            reject_count: 0,
            buckets: tiers.iter().map(|&tier| TokenBucket::new(tier, now)).collect(),
        }
    }

    /// Accrue tokens in every bucket.
    pub fn refill_all(&mut self, now: DateTime<Utc>) {
        for bucket in &mut self.buckets {
            bucket.refill(now);
        }
    }

    /// Whether every tier can cover `events` tokens.
    pub fn can_consume(&self, events: u32) -> bool {
        self.first_insufficient_tier(events).is_none()
    }

    /// Debit `events` tokens from every bucket, or from none.
    ///
    /// On success every bucket is debited and `accept_count` incremented.
    /// Otherwise no bucket is touched, `reject_count` is incremented, and
    /// the index of the first tier that could not cover the request is
    /// returned.
    pub fn try_consume(&mut self, events: u32) -> Result<(), usize> {
        if let Some(tier_index) = self.first_insufficient_tier(events) {
            self.reject_count += 1;
            return Err(tier_index);
        }
        for bucket in &mut self.buckets {
            bucket.debit(f64::from(events));
        }
        self.accept_count += 1;
        Ok(())
    }

    /// Align the bucket list to a new tier list.
    ///
    /// Positions present in both lists keep their bucket (emptied only
    /// when the tier actually changed), new trailing tiers get fresh
    /// buckets, and buckets past the end of the new list are dropped.
    pub fn reconfigure(&mut self, tiers: &[RateLimit], now: DateTime<Utc>) {
        for (index, &tier) in tiers.iter().enumerate() {
            match self.buckets.get_mut(index) {
                Some(bucket) => bucket.reconfigure(tier, now),
                None => self.buckets.push(TokenBucket::new(tier, now)),
            }
        }
        self.buckets.truncate(tiers.len());
    }

    /// The tier list this state currently enforces.
    pub fn tiers(&self) -> Vec<RateLimit> {
        self.buckets.iter().map(|bucket| bucket.limit).collect()
    }

    fn first_insufficient_tier(&self, events: u32) -> Option<usize> {
        self.buckets
            .iter()
            .position(|bucket| !bucket.has_at_least(f64::from(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn two_tier_state() -> LimiterState {
        LimiterState::new(&[RateLimit::new(5, 10), RateLimit::new(250, 600)], t0())
    }

    #[test]
    fn test_new_state_starts_empty() {
        let state = two_tier_state();

        assert_eq!(state.accept_count, 0);
        assert_eq!(state.reject_count, 0);
        assert_eq!(state.buckets.len(), 2);
        assert!(state.buckets.iter().all(|b| b.tokens == 0.0));
    }

    #[test]
    fn test_consume_after_full_interval() {
        // Tier {5, 10} starting empty at t0: refilling at t0+10s yields
        // 5 tokens; consuming 3 leaves 2; an immediate second consume of
        // 3 is rejected.
        let mut state = LimiterState::new(&[RateLimit::new(5, 10)], t0());
        let now = t0() + Duration::seconds(10);

        state.refill_all(now);
        assert!((state.buckets[0].tokens - 5.0).abs() < 1e-9);

        assert_eq!(state.try_consume(3), Ok(()));
        assert!((state.buckets[0].tokens - 2.0).abs() < 1e-9);

        state.refill_all(now);
        assert_eq!(state.try_consume(3), Err(0));
        assert_eq!(state.accept_count, 1);
        assert_eq!(state.reject_count, 1);
    }

    #[test]
    fn test_rejection_debits_no_bucket() {
        // First tier full, second tier exhausted: the request must be
        // rejected by the second tier with the first left untouched.
        let mut state = two_tier_state();
        state.buckets[0].tokens = 5.0;
        state.buckets[1].tokens = 0.0;

        assert_eq!(state.try_consume(1), Err(1));

        assert_eq!(state.buckets[0].tokens, 5.0);
        assert_eq!(state.buckets[1].tokens, 0.0);
        assert_eq!(state.accept_count, 0);
        assert_eq!(state.reject_count, 1);
    }

    #[test]
    fn test_consume_debits_every_bucket() {
        let mut state = two_tier_state();
        state.buckets[0].tokens = 5.0;
        state.buckets[1].tokens = 100.0;

        assert_eq!(state.try_consume(2), Ok(()));

        assert!((state.buckets[0].tokens - 3.0).abs() < 1e-9);
        assert!((state.buckets[1].tokens - 98.0).abs() < 1e-9);
        assert_eq!(state.accept_count, 1);
    }

    #[test]
    fn test_can_consume_is_pure() {
        let mut state = two_tier_state();
        state.buckets[0].tokens = 1.0;
        state.buckets[1].tokens = 1.0;
        let before = state.clone();

        assert!(state.can_consume(1));
        assert!(!state.can_consume(2));
        assert_eq!(state, before);
    }

    #[test]
    fn test_reconfigure_with_same_tiers_is_noop() {
        let mut state = two_tier_state();
        state.buckets[0].tokens = 3.0;
        let before = state.clone();

        state.reconfigure(
            &[RateLimit::new(5, 10), RateLimit::new(250, 600)],
            t0() + Duration::seconds(30),
        );

        assert_eq!(state, before);
    }

    #[test]
    fn test_reconfigure_resets_changed_tier_only() {
        let mut state = two_tier_state();
        state.buckets[0].tokens = 3.0;
        state.buckets[1].tokens = 40.0;

        state.reconfigure(
            &[RateLimit::new(20, 10), RateLimit::new(250, 600)],
            t0() + Duration::seconds(30),
        );

        assert_eq!(state.buckets[0].tokens, 0.0);
        assert_eq!(state.buckets[0].limit, RateLimit::new(20, 10));
        assert_eq!(state.buckets[1].tokens, 40.0);
    }

    #[test]
    fn test_reconfigure_appends_and_drops_tiers() {
        let mut state = two_tier_state();

        state.reconfigure(
            &[
                RateLimit::new(5, 10),
                RateLimit::new(250, 600),
                RateLimit::new(1000, 3600),
            ],
            t0(),
        );
        assert_eq!(state.buckets.len(), 3);
        assert_eq!(state.buckets[2].limit, RateLimit::new(1000, 3600));

        state.reconfigure(&[RateLimit::new(5, 10)], t0());
        assert_eq!(state.tiers(), vec![RateLimit::new(5, 10)]);
    }

    #[test]
    fn test_capacity_invariant_across_operations() {
        let mut state = LimiterState::new(&[RateLimit::new(5, 10)], t0());

        for step in 1..=50 {
            state.refill_all(t0() + Duration::seconds(step * 3));
            let _ = state.try_consume(2);
            let tokens = state.buckets[0].tokens;
            assert!((0.0..=5.0).contains(&tokens), "tokens out of range: {tokens}");
        }
    }
}
