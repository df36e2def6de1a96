//! # Elector Engine
//!
//! Lease-based leader election over any [`LockBackend`](elector_core::LockBackend).
//!
//! This crate provides:
//! - The [`LeaderElector`] state machine (`Standby`, `Acquiring`, `Leading`,
//!   `Renewing`, `Released`)
//! - Lease timing configuration through [`ElectionConfig`]
//! - Lifecycle hooks through [`LeaderCallbacks`]
//! - A lock-free [`LeaderObserver`] caching the last known leader
//!
//! ## Example
//!
//! ```rust,no_run
//! use elector_core::ElectionIdentity;
//! use elector_engine::{ElectionConfig, LeaderCallbacks, LeaderElector, LeaderObserver};
//! use elector_store::InMemoryLockStore;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # async fn example() -> elector_core::Result<()> {
//! let identity = ElectionIdentity::in_default_namespace("scheduler", "node-a")?;
//! let observer = Arc::new(LeaderObserver::new());
//! let callbacks = observer.attach(
//!     LeaderCallbacks::new().on_started_leading(|ctx| println!("{} leads", ctx.identity())),
//! );
//!
//! let elector = LeaderElector::new(
//!     identity,
//!     ElectionConfig::default(),
//!     InMemoryLockStore::new(),
//!     callbacks,
//! )?;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let task = tokio::spawn(elector.run(shutdown_rx));
//!
//! // ...
//! shutdown_tx.send_replace(true);
//! task.await.expect("election task panicked")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod elector;
pub mod observer;
pub mod state;

pub use config::{
    ElectionConfig, LeaderCallbacks, LeaderContext, NewLeaderFn, StartedLeadingFn,
    StoppedLeadingFn,
};
pub use elector::{ElectorHandle, LeaderElector};
pub use observer::LeaderObserver;
pub use state::{ElectionState, ElectionStats};
