use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use elector_core::{
    ElectorError, LockBackend, LockKey, LockRecord, Result, Version, VersionedRecord,
};
use std::sync::Arc;
use tracing::debug;

/// In-memory lock backend.
///
/// Conditional updates are serialized per key by the map's shard locks, so
/// it enforces true compare-and-swap semantics between tasks of one
/// process. Clones share the same records, which makes it suitable for
/// simulating several candidates against one backend in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    records: Arc<DashMap<LockKey, VersionedRecord>>,
}

impl InMemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lock records currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Delete a record outright, as an operator would.
    pub fn remove(&self, key: &LockKey) -> Option<VersionedRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }
}

#[async_trait]
impl LockBackend for InMemoryLockStore {
    async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(existing) => Err(ElectorError::conflict(
                &key.namespace,
                &key.name,
                format!("record already exists at {}", existing.get().version),
            )),
            Entry::Vacant(slot) => {
                slot.insert(VersionedRecord::new(record.clone(), Version::INITIAL));
                debug!("Created lock record {} for {:?}", key, record.holder_id);
                Ok(Version::INITIAL)
            }
        }
    }

    async fn update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Version,
    ) -> Result<Version> {
        let mut current = self
            .records
            .get_mut(key)
            .ok_or_else(|| ElectorError::not_found(&key.namespace, &key.name))?;

        if current.version != expected {
            return Err(ElectorError::conflict(
                &key.namespace,
                &key.name,
                format!("expected {}, found {}", expected, current.version),
            ));
        }

        let version = expected.next();
        *current = VersionedRecord::new(record.clone(), version);
        debug!("Updated lock record {} to {}", key, version);
        Ok(version)
    }
}
