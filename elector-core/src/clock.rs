//! # Clocks
//!
//! Time sources used to stamp and expire lock records.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of epoch-millisecond timestamps.
///
/// Lock records are written by one host and expired by another, so every
/// implementation must report wall-clock time. Skew between hosts is not
/// compensated.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// The host's wall clock.
///
/// # Examples
///
/// ```rust
/// use elector_core::{Clock, SystemClock};
///
/// let now = SystemClock.now_millis();
/// assert!(now > 0);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Wall time captured once, advanced by the tokio monotonic clock.
///
/// Immune to wall-clock jumps after startup, and follows tokio's paused
/// time in tests, so lease expiry can be driven by `tokio::time::advance`.
///
/// # Examples
///
/// ```rust
/// use elector_core::{AnchoredClock, Clock};
///
/// let clock = AnchoredClock::with_anchor(5_000);
/// assert!(clock.now_millis() >= 5_000);
/// ```
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    anchor_millis: u64,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new() -> Self {
        Self::with_anchor(SystemClock.now_millis())
    }

    pub fn with_anchor(anchor_millis: u64) -> Self {
        Self {
            anchor_millis,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for AnchoredClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for AnchoredClock {
    fn now_millis(&self) -> u64 {
        self.anchor_millis
            .saturating_add(self.started.elapsed().as_millis() as u64)
    }
}
