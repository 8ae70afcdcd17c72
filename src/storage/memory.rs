//! In-memory revocation store

use crate::storage::{async_trait, RevocationRecord, RevocationStore, StorageError};
use dashmap::DashMap;

/// Revoked tokens kept in process memory
///
/// Revocations are lost on restart; use the Postgres store when they must
/// survive one.
#[derive(Default)]
pub struct MemoryRevocationStore {
    records: DashMap<String, RevocationRecord>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record for a revoked token
    pub fn get(&self, token: &str) -> Option<RevocationRecord> {
        self.records.get(token).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn has(&self, token: &str) -> Result<bool, StorageError> {
        Ok(self.records.contains_key(token))
    }

    async fn insert(&self, record: RevocationRecord) -> Result<(), StorageError> {
        // First revocation wins; later ones keep the original reason.
        self.records.entry(record.token.clone()).or_insert(record);
        Ok(())
    }
}
