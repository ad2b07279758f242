//! The distributed rate limiter handle.
//!
//! A handle holds only the limiter's name and tier configuration; the
//! single shared mutable resource is the [`LimiterState`] in the store,
//! updated through versioned writes or store-level transactions. Any
//! number of handles with the same name, in any number of processes,
//! enforce one shared budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, trace};

use crate::error::{RateLimitError, Result};
use crate::store::{StateStore, StoreError, TransactionalStateStore};

use super::bucket::RateLimit;
use super::state::LimiterState;

/// Default bound on optimistic commit attempts per call.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Upper bound of the random sleep between contended attempts, in
/// microseconds.
const RETRY_JITTER_MICROS: u64 = 5_000;

/// How a handle persists its load-refill-check-commit cycle.
enum Strategy {
    /// Load, modify, then commit with a version check; retry the whole
    /// cycle on conflict.
    Optimistic {
        store: Arc<dyn StateStore>,
        max_attempts: u32,
    },
    /// Run the whole cycle inside a store-managed serializable
    /// transaction; the store owns the retry policy.
    Transactional {
        store: Arc<dyn TransactionalStateStore>,
    },
}

/// A handle to a named rate limiter shared through a state store.
pub struct DistributedRateLimiter {
    name: String,
    tiers: RwLock<Vec<RateLimit>>,
    strategy: Strategy,
}

impl DistributedRateLimiter {
    /// Create a handle using optimistic versioned writes.
    pub fn new(
        store: Arc<dyn StateStore>,
        name: impl Into<String>,
        tiers: Vec<RateLimit>,
    ) -> Self {
        Self {
            name: name.into(),
            tiers: RwLock::new(tiers),
            strategy: Strategy::Optimistic {
                store,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            },
        }
    }

    /// Create a handle backed by a transactional store.
    pub fn transactional(
        store: Arc<dyn TransactionalStateStore>,
        name: impl Into<String>,
        tiers: Vec<RateLimit>,
    ) -> Self {
        Self {
            name: name.into(),
            tiers: RwLock::new(tiers),
            strategy: Strategy::Transactional { store },
        }
    }

    /// Override the optimistic retry budget. A minimum of one attempt is
    /// always kept; transactional handles are unaffected.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        if let Strategy::Optimistic { max_attempts, .. } = &mut self.strategy {
            *max_attempts = attempts.max(1);
        }
        self
    }

    /// The limiter's sharing key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tier list this handle initializes unknown state with.
    pub fn tiers(&self) -> Vec<RateLimit> {
        self.tiers.read().clone()
    }

    /// Ensure shared state exists for this limiter's name with `tiers`.
    ///
    /// Reconfiguring with an unchanged tier list leaves token balances
    /// alone; a changed tier empties its bucket, since accumulated credit
    /// does not survive a quota change. The tier list is also kept on the
    /// handle for future auto-initialization.
    pub async fn configure(&self, tiers: Vec<RateLimit>) -> Result<()> {
        info!(name = %self.name, tiers = tiers.len(), "Configuring rate limiter");

        match &self.strategy {
            Strategy::Optimistic {
                store,
                max_attempts,
            } => {
                self.configure_optimistic(store.as_ref(), *max_attempts, &tiers)
                    .await
            }
            Strategy::Transactional { store } => store
                .run_in_transaction(&self.name, &mut |current| {
                    let now = Utc::now();
                    let mut state = current.unwrap_or_else(|| LimiterState::new(&tiers, now));
                    state.reconfigure(&tiers, now);
                    Some(state)
                })
                .await
                .map_err(|err| self.map_store_error(err)),
        }?;

        // The handle adopts the tiers only once they are persisted, so a
        // failed configure cannot leave it disagreeing with the store.
        *self.tiers.write() = tiers;
        Ok(())
    }

    /// Try to take `events` tokens from every configured tier.
    ///
    /// Grants are all-or-nothing: either every tier is debited and the
    /// debit is committed to the shared store, or nothing is. Unknown
    /// names are initialized on first use with empty buckets for the
    /// handle's tiers.
    pub async fn try_consume(&self, events: u32) -> Result<()> {
        match &self.strategy {
            Strategy::Optimistic {
                store,
                max_attempts,
            } => {
                self.try_consume_optimistic(store.as_ref(), *max_attempts, events)
                    .await
            }
            Strategy::Transactional { store } => {
                self.try_consume_transactional(store.as_ref(), events).await
            }
        }
    }

    /// [`try_consume`](Self::try_consume) bounded by a caller deadline.
    ///
    /// Expiry mid-retry returns [`RateLimitError::ContentionExhausted`]
    /// promptly. The version check on every commit guarantees that an
    /// abandoned attempt left no partial debit behind.
    pub async fn try_consume_before(
        &self,
        events: u32,
        deadline: tokio::time::Instant,
    ) -> Result<()> {
        match tokio::time::timeout_at(deadline, self.try_consume(events)).await {
            Ok(result) => result,
            Err(_) => Err(RateLimitError::ContentionExhausted {
                name: self.name.clone(),
                attempts: 0,
            }),
        }
    }

    /// Best-effort read of the current shared state for diagnostics.
    ///
    /// Served from a plain read, so it may be slightly stale; it does not
    /// participate in the versioned write protocol.
    pub async fn debug_snapshot(&self) -> Result<Option<LimiterState>> {
        let loaded = match &self.strategy {
            Strategy::Optimistic { store, .. } => store.load(&self.name).await?,
            Strategy::Transactional { store } => store.load(&self.name).await?,
        };
        Ok(loaded.map(|(state, _)| state))
    }

    async fn configure_optimistic(
        &self,
        store: &dyn StateStore,
        max_attempts: u32,
        tiers: &[RateLimit],
    ) -> Result<()> {
        for attempt in 1..=max_attempts {
            let now = Utc::now();
            let (mut state, version) = match store.load(&self.name).await? {
                Some((state, version)) => (state, Some(version)),
                None => (LimiterState::new(tiers, now), None),
            };
            state.reconfigure(tiers, now);

            if store.store_if_version(&self.name, &state, version).await? {
                return Ok(());
            }
            debug!(name = %self.name, attempt, "Configure lost a version race, retrying");
            jitter_sleep().await;
        }
        Err(RateLimitError::ContentionExhausted {
            name: self.name.clone(),
            attempts: max_attempts,
        })
    }

    async fn try_consume_optimistic(
        &self,
        store: &dyn StateStore,
        max_attempts: u32,
        events: u32,
    ) -> Result<()> {
        let tiers = self.tiers.read().clone();

        for attempt in 1..=max_attempts {
            let now = Utc::now();
            let (mut state, version) = match store.load(&self.name).await? {
                Some((state, version)) => (state, Some(version)),
                None => (LimiterState::new(&tiers, now), None),
            };
            state.refill_all(now);
            trace!(name = %self.name, events, attempt, "Checking rate limit");

            match state.try_consume(events) {
                Ok(()) => {
                    if store.store_if_version(&self.name, &state, version).await? {
                        return Ok(());
                    }
                    // Another caller committed first. The whole read is
                    // stale, so redo it: time has advanced and the other
                    // caller's debit is now visible.
                    debug!(name = %self.name, attempt, "Commit lost a version race, retrying");
                    jitter_sleep().await;
                }
                Err(tier_index) => {
                    let limit = state.buckets[tier_index].limit;
                    // The reject counter is best effort: a conflict here
                    // changes no admission decision, so it is not retried.
                    store.store_if_version(&self.name, &state, version).await?;
                    debug!(name = %self.name, tier = tier_index, %limit, "Rate limit exceeded");
                    return Err(RateLimitError::Exceeded { tier_index, limit });
                }
            }
        }

        debug!(name = %self.name, attempts = max_attempts, "Retry budget exhausted");
        Err(RateLimitError::ContentionExhausted {
            name: self.name.clone(),
            attempts: max_attempts,
        })
    }

    async fn try_consume_transactional(
        &self,
        store: &dyn TransactionalStateStore,
        events: u32,
    ) -> Result<()> {
        let tiers = self.tiers.read().clone();
        let mut rejection: Option<(usize, RateLimit)> = None;
        let mut decided = false;

        store
            .run_in_transaction(&self.name, &mut |current| {
                let now = Utc::now();
                let mut state = current.unwrap_or_else(|| LimiterState::new(&tiers, now));
                state.refill_all(now);
                if let Err(tier_index) = state.try_consume(events) {
                    rejection = Some((tier_index, state.buckets[tier_index].limit));
                }
                decided = true;
                Some(state)
            })
            .await
            .map_err(|err| self.map_store_error(err))?;

        if !decided {
            // The store resolved without ever running the closure.
            return Err(RateLimitError::ContentionExhausted {
                name: self.name.clone(),
                attempts: 0,
            });
        }
        match rejection {
            None => Ok(()),
            Some((tier_index, limit)) => {
                debug!(name = %self.name, tier = tier_index, %limit, "Rate limit exceeded");
                Err(RateLimitError::Exceeded { tier_index, limit })
            }
        }
    }

    fn map_store_error(&self, err: StoreError) -> RateLimitError {
        match err {
            StoreError::Contention { attempts } => RateLimitError::ContentionExhausted {
                name: self.name.clone(),
                attempts,
            },
            other => RateLimitError::Store(other),
        }
    }
}

async fn jitter_sleep() {
    let micros = rand::thread_rng().gen_range(0..RETRY_JITTER_MICROS);
    tokio::time::sleep(Duration::from_micros(micros)).await;
}
