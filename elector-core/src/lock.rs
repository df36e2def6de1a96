//! # Lock Backend
//!
//! The contract every durable lock store has to fulfil.

use crate::{LockKey, LockRecord, Result, Version, VersionedRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Conditional-update storage for lock records.
///
/// Implementations must make `create` and `update` atomic with respect to
/// each other: for a given key, at most one writer can succeed against a
/// given version. This is the only mutual exclusion primitive the election
/// relies on.
///
/// Conflicts are reported with [`ElectorError::Conflict`](crate::ElectorError::Conflict)
/// so that callers can tell them apart from transient failures, which
/// should use [`ElectorError::BackendUnavailable`](crate::ElectorError::BackendUnavailable).
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Read the current record.
    ///
    /// # Returns
    /// * `Ok(Some(record))` with the version it was read at
    /// * `Ok(None)` if no record exists yet
    /// * `Err(ElectorError)` on backend failure
    async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>>;

    /// Create the record if it does not exist.
    ///
    /// # Returns
    /// * `Ok(version)` of the new record
    /// * `Err(ElectorError::Conflict)` if a record already exists
    async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version>;

    /// Replace the record if its current version equals `expected`.
    ///
    /// # Returns
    /// * `Ok(version)` of the written record
    /// * `Err(ElectorError::Conflict)` if the version moved on
    /// * `Err(ElectorError::NotFound)` if the record does not exist
    async fn update(&self, key: &LockKey, record: &LockRecord, expected: Version)
        -> Result<Version>;
}

#[async_trait]
impl<T: LockBackend + ?Sized> LockBackend for Arc<T> {
    async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>> {
        (**self).get(key).await
    }

    async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version> {
        (**self).create(key, record).await
    }

    async fn update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Version,
    ) -> Result<Version> {
        (**self).update(key, record, expected).await
    }
}
