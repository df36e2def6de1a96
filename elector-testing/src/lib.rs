//! Test support for Elector: a fault-injecting backend wrapper and a harness
//! that runs several candidates against one shared backend.

pub mod fault_injection;
pub mod harness;

pub use fault_injection::{FaultConditions, FaultStats, FaultyLockStore};
pub use harness::{
    Candidate, ElectionEvent, ElectionHarness, RecordedEvent, Term, HARNESS_EPOCH_MILLIS,
};

/// Install a WARN-level test subscriber once per process.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}
