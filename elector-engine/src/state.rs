//! Election state and statistics.

use std::fmt;

/// Where the elector is in its lifecycle.
///
/// ```text
/// Standby -> Acquiring -> Leading <-> Renewing
///               ^                        |
///               +--- Standby <- Released-+--> (cancelled: terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionState {
    /// Not contesting yet, or just lost leadership
    Standby,

    /// Trying to take the lease
    Acquiring,

    /// Holding the lease, waiting for the next renewal
    Leading,

    /// Holding the lease, renewal in progress
    Renewing,

    /// Leadership ended; terminal once cancelled
    Released,
}

impl ElectionState {
    /// Whether this candidate currently believes itself leader.
    pub fn is_leading(&self) -> bool {
        matches!(self, ElectionState::Leading | ElectionState::Renewing)
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElectionState::Standby => "standby",
            ElectionState::Acquiring => "acquiring",
            ElectionState::Leading => "leading",
            ElectionState::Renewing => "renewing",
            ElectionState::Released => "released",
        };
        f.write_str(name)
    }
}

/// Statistics about election operations
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ElectionStats {
    pub acquire_attempts: u64,
    pub acquisitions: u64,
    pub renewals: u64,
    pub renewal_failures: u64,
    pub leadership_losses: u64,
    pub releases: u64,
    pub leader_changes_observed: u64,
}
