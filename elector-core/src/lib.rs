//! # Elector Core
//!
//! Core building blocks for lease-based leader election.
//!
//! This crate defines the pieces shared by every other Elector crate:
//!
//! - **Identity**: [`ElectionIdentity`] names a candidate in an election
//! - **Lock Records**: [`LockRecord`], [`Version`] and [`VersionedRecord`] model
//!   the externally owned lease
//! - **Lock Backend**: the [`LockBackend`] trait, a conditional-update store
//!   that arbitrates who holds the lease
//! - **Clocks**: [`Clock`] implementations used to stamp and expire records
//! - **Error Handling**: [`ElectorError`] and the crate-wide [`Result`] alias
//!
//! ## Implementing a Backend
//!
//! ```rust
//! use async_trait::async_trait;
//! use elector_core::{ElectorError, LockBackend, LockKey, LockRecord, Result, Version, VersionedRecord};
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct MapBackend {
//!     records: Mutex<HashMap<LockKey, VersionedRecord>>,
//! }
//!
//! #[async_trait]
//! impl LockBackend for MapBackend {
//!     async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>> {
//!         Ok(self.records.lock().unwrap().get(key).cloned())
//!     }
//!
//!     async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version> {
//!         let mut records = self.records.lock().unwrap();
//!         if records.contains_key(key) {
//!             return Err(ElectorError::conflict(&key.namespace, &key.name, "exists"));
//!         }
//!         records.insert(key.clone(), VersionedRecord::new(record.clone(), Version::INITIAL));
//!         Ok(Version::INITIAL)
//!     }
//!
//!     async fn update(&self, key: &LockKey, record: &LockRecord, expected: Version) -> Result<Version> {
//!         let mut records = self.records.lock().unwrap();
//!         let current = records
//!             .get_mut(key)
//!             .ok_or_else(|| ElectorError::not_found(&key.namespace, &key.name))?;
//!         if current.version != expected {
//!             return Err(ElectorError::conflict(&key.namespace, &key.name, "stale"));
//!         }
//!         *current = VersionedRecord::new(record.clone(), expected.next());
//!         Ok(current.version)
//!     }
//! }
//! ```

pub mod clock;
pub mod error;
pub mod lock;
pub mod types;

pub use clock::*;
pub use error::*;
pub use lock::*;
pub use types::*;
