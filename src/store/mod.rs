//! State store contracts for shared limiter state.
//!
//! The store is an external collaborator: a key-value service with
//! versioned writes, and optionally serializable read-modify-write
//! transactions. The limiter takes no locks of its own; all coordination
//! between callers happens through one of these two contracts.

mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::LimiterState;

/// Version attached to a stored state, checked on every write.
pub type Version = u64;

/// Errors reported by a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored payload could not be encoded or decoded.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transactional store gave up retrying a contended transaction.
    #[error("transaction contention after {attempts} attempts")]
    Contention { attempts: u32 },
}

/// Closure applied to the stored state inside a transaction.
///
/// Receives the current state (`None` when the key does not exist yet)
/// and returns the state to write back, or `None` to leave the store
/// untouched.
pub type StateUpdate<'a> =
    &'a mut (dyn FnMut(Option<LimiterState>) -> Option<LimiterState> + Send);

/// Versioned key-value contract for shared limiter state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the state and its version for `name`, if present.
    async fn load(&self, name: &str) -> Result<Option<(LimiterState, Version)>, StoreError>;

    /// Write `state` only if the stored version still matches `expected`,
    /// where `None` means the key must not exist yet.
    ///
    /// Returns `Ok(false)` on a version conflict. Conflicts are ordinary
    /// outcomes of concurrent callers, not errors.
    async fn store_if_version(
        &self,
        name: &str,
        state: &LimiterState,
        expected: Option<Version>,
    ) -> Result<bool, StoreError>;
}

/// Extension for stores offering serializable read-modify-write.
///
/// The store owns the retry policy for contended transactions. When it
/// gives up it reports [`StoreError::Contention`], so both persistence
/// strategies surface contention to callers the same way.
#[async_trait]
pub trait TransactionalStateStore: StateStore {
    /// Run `apply` against the current state of `name` in a transaction.
    async fn run_in_transaction(
        &self,
        name: &str,
        apply: StateUpdate<'_>,
    ) -> Result<(), StoreError>;
}
