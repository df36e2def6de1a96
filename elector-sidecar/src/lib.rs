//! # Elector Sidecar
//!
//! Process-level pieces of the `elector` binary: command line settings, the
//! HTTP status endpoint and the [`Supervisor`] that runs them next to a
//! [`LeaderElector`](elector_engine::LeaderElector).

pub mod settings;
pub mod status;
pub mod supervisor;

pub use settings::{parse_duration, BackendKind, LogFormat, Settings, DEFAULT_PORT};
pub use status::{serve_status, status_router, LeaderData};
pub use supervisor::{shutdown_signal, Supervisor};
