//! # Elector Store
//!
//! Lock backend implementations for the Elector leader election sidecar.
//!
//! Both backends enforce true conditional-update semantics: for any record,
//! at most one writer can succeed against a given version.
//!
//! ## Implementations
//!
//! - [`InMemoryLockStore`] - Records held in process memory (testing/single process)
//! - [`FileSystemLockStore`] - Records stored as files in a shared directory
//!   (persistent across restarts, contended by every process on the directory)
//!
//! ## Example
//!
//! ```rust
//! use elector_core::{LockBackend, LockKey, LockRecord, Version};
//! use elector_store::InMemoryLockStore;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryLockStore::new();
//! let key = LockKey::new("default", "scheduler");
//!
//! let version = store
//!     .create(&key, &LockRecord::acquired_by("node-a", 15, 0))
//!     .await
//!     .unwrap();
//! assert_eq!(version, Version::INITIAL);
//!
//! // A second create loses the race
//! let err = store
//!     .create(&key, &LockRecord::acquired_by("node-b", 15, 0))
//!     .await
//!     .unwrap_err();
//! assert!(err.is_conflict());
//! # });
//! ```

pub mod file_system;
pub mod in_memory;

pub use file_system::FileSystemLockStore;
pub use in_memory::InMemoryLockStore;
