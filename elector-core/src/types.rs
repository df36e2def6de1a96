//! # Core Types
//!
//! Identity and lock record types shared by every Elector component.

use crate::{ElectorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Key of a lock record in the backend: `(namespace, election name)`.
///
/// # Examples
///
/// ```rust
/// use elector_core::LockKey;
///
/// let key = LockKey::new("default", "scheduler");
/// assert_eq!(key.to_string(), "default/scheduler");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub namespace: String,
    pub name: String,
}

impl LockKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Immutable identity of one candidate in one election.
///
/// Built once at startup and never mutated. Construction fails with a
/// configuration error if any field is empty, which is the only fatal
/// error the sidecar raises.
///
/// # Examples
///
/// ```rust
/// use elector_core::ElectionIdentity;
///
/// let identity = ElectionIdentity::new("scheduler", "node-a", "default").unwrap();
/// assert_eq!(identity.candidate_id(), "node-a");
/// assert_eq!(identity.lock_key().to_string(), "default/scheduler");
///
/// assert!(ElectionIdentity::new("", "node-a", "default").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElectionIdentity {
    election_name: String,
    candidate_id: String,
    namespace: String,
}

impl ElectionIdentity {
    /// Creates a validated identity.
    pub fn new(
        election_name: impl Into<String>,
        candidate_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            election_name: election_name.into(),
            candidate_id: candidate_id.into(),
            namespace: namespace.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Creates a validated identity in the [`DEFAULT_NAMESPACE`].
    pub fn in_default_namespace(
        election_name: impl Into<String>,
        candidate_id: impl Into<String>,
    ) -> Result<Self> {
        Self::new(election_name, candidate_id, DEFAULT_NAMESPACE)
    }

    fn validate(&self) -> Result<()> {
        if self.election_name.trim().is_empty() {
            return Err(ElectorError::config("election name cannot be empty"));
        }
        if self.candidate_id.trim().is_empty() {
            return Err(ElectorError::config("candidate id cannot be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ElectorError::config("namespace cannot be empty"));
        }
        if self.namespace.contains('/') || self.election_name.contains('/') {
            return Err(ElectorError::config(
                "namespace and election name cannot contain '/'",
            ));
        }
        Ok(())
    }

    pub fn election_name(&self) -> &str {
        &self.election_name
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the lock record contested by this identity.
    pub fn lock_key(&self) -> LockKey {
        LockKey::new(self.namespace.clone(), self.election_name.clone())
    }
}

impl fmt::Display for ElectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            self.candidate_id, self.namespace, self.election_name
        )
    }
}

/// Optimistic concurrency token of a lock record.
///
/// Every successful write advances the version. A freshly created record
/// starts at [`Version::INITIAL`].
///
/// # Examples
///
/// ```rust
/// use elector_core::Version;
///
/// let v1 = Version::INITIAL;
/// let v2 = v1.next();
/// assert!(v2 > v1);
/// assert_eq!(v2.value(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    pub const INITIAL: Version = Version(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The externally owned lease record.
///
/// Timestamps are milliseconds since the Unix epoch as written by the
/// holder's own clock. Expiry compares them against the reader's clock, so
/// clock skew between hosts shifts the effective lease length by the skew.
///
/// # Examples
///
/// ```rust
/// use elector_core::LockRecord;
///
/// let record = LockRecord::acquired_by("node-a", 15, 1_000);
/// assert!(record.is_held_by("node-a"));
/// assert!(!record.is_expired(15_999));
/// assert!(record.is_expired(16_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Identity of the current holder, empty when unheld
    pub holder_id: String,

    /// When the current holder acquired the lock
    pub acquire_time: u64,

    /// When the current holder last renewed the lock
    pub renew_time: u64,

    /// How long a renewal stays valid
    pub lease_duration_seconds: u64,

    /// Number of times the holder changed
    #[serde(default)]
    pub leader_transitions: u64,
}

impl LockRecord {
    /// A record freshly acquired by `holder_id` at `now`.
    pub fn acquired_by(holder_id: impl Into<String>, lease_duration_seconds: u64, now: u64) -> Self {
        Self {
            holder_id: holder_id.into(),
            acquire_time: now,
            renew_time: now,
            lease_duration_seconds,
            leader_transitions: 0,
        }
    }

    /// A record with no holder, immediately acquirable by anyone.
    pub fn released(previous: &LockRecord, now: u64) -> Self {
        Self {
            holder_id: String::new(),
            acquire_time: now,
            renew_time: now,
            lease_duration_seconds: 1,
            leader_transitions: previous.leader_transitions,
        }
    }

    pub fn is_held(&self) -> bool {
        !self.holder_id.is_empty()
    }

    pub fn is_held_by(&self, candidate_id: &str) -> bool {
        self.is_held() && self.holder_id == candidate_id
    }

    /// Instant (epoch millis) at which the lease stops being valid.
    pub fn expires_at(&self) -> u64 {
        self.renew_time
            .saturating_add(self.lease_duration_seconds.saturating_mul(1000))
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    /// Whether a candidate other than the holder may take the lock at `now`.
    pub fn is_acquirable(&self, now: u64) -> bool {
        !self.is_held() || self.is_expired(now)
    }
}

/// A lock record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub record: LockRecord,
    pub version: Version,
}

impl VersionedRecord {
    pub fn new(record: LockRecord, version: Version) -> Self {
        Self { record, version }
    }
}
