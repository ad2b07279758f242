//! In-memory versioned state store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StateStore, StateUpdate, StoreError, TransactionalStateStore, Version};
use crate::ratelimit::LimiterState;

/// A process-local [`StateStore`] holding serialized state blobs.
///
/// Payloads are kept encoded, the way a remote key-value service would
/// hold them, so the serialization path is exercised even in memory. The
/// per-key entry lock makes each read-modify-write serializable, which
/// lets this store back both contracts for tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryStateStore {
    records: DashMap<String, Record>,
}

struct Record {
    version: Version,
    payload: String,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of named limiters currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no state at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn encode(state: &LimiterState) -> Result<String, StoreError> {
    Ok(serde_json::to_string(state)?)
}

fn decode(payload: &str) -> Result<LimiterState, StoreError> {
    Ok(serde_json::from_str(payload)?)
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, name: &str) -> Result<Option<(LimiterState, Version)>, StoreError> {
        match self.records.get(name) {
            Some(record) => Ok(Some((decode(&record.payload)?, record.version))),
            None => Ok(None),
        }
    }

    async fn store_if_version(
        &self,
        name: &str,
        state: &LimiterState,
        expected: Option<Version>,
    ) -> Result<bool, StoreError> {
        let payload = encode(state)?;
        match self.records.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected != Some(occupied.get().version) {
                    return Ok(false);
                }
                let version = occupied.get().version + 1;
                occupied.insert(Record { version, payload });
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(Record {
                    version: 1,
                    payload,
                });
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl TransactionalStateStore for MemoryStateStore {
    async fn run_in_transaction(
        &self,
        name: &str,
        apply: StateUpdate<'_>,
    ) -> Result<(), StoreError> {
        // The entry guard pins the key for the whole read-modify-write,
        // so the transaction never conflicts and needs no retry here.
        match self.records.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = decode(&occupied.get().payload)?;
                if let Some(updated) = apply(Some(current)) {
                    let version = occupied.get().version + 1;
                    occupied.insert(Record {
                        version,
                        payload: encode(&updated)?,
                    });
                }
            }
            Entry::Vacant(vacant) => {
                if let Some(updated) = apply(None) {
                    vacant.insert(Record {
                        version: 1,
                        payload: encode(&updated)?,
                    });
                }
            }
        }
        Ok(())
    }
}
