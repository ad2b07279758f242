//! Error types for rate limiter operations.

use thiserror::Error;

use crate::ratelimit::RateLimit;
use crate::store::StoreError;

/// Main error type for rate limiter operations.
///
/// Admission arithmetic never fails; only the store interaction can. A
/// `try_consume` call either succeeds or returns exactly one of these.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Admission was denied: a tier lacked sufficient tokens.
    #[error("rate limit exceeded by tier {tier_index} ({limit})")]
    Exceeded {
        /// Index of the first tier that could not cover the request.
        tier_index: usize,
        /// The limit enforced by that tier.
        limit: RateLimit,
    },

    /// The retry budget ran out before a decision could be committed.
    ///
    /// Distinct from [`RateLimitError::Exceeded`]: admission was never
    /// decided, not denied. Callers should back off and retry later.
    #[error("contention exhausted for limiter '{name}' after {attempts} attempts")]
    ContentionExhausted { name: String, attempts: u32 },

    /// The state store failed for a reason unrelated to versioning.
    #[error("state store failure: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;
