//! # Error Types
//!
//! Error handling for leader election and lock backend operations.

use thiserror::Error;

/// Error types that can occur while contesting an election.
///
/// Most of these never escape the election loop: backend failures and
/// conflicts are absorbed into state transitions. Only configuration
/// errors are fatal, and they are raised before any election attempt.
///
/// # Error Categories
///
/// - **Configuration Errors**: malformed identity or timing parameters
/// - **Backend Errors**: transient I/O or network failures talking to the lock store
/// - **Concurrency Signals**: version conflicts and missing records
/// - **Integrity Errors**: corrupted records in durable storage
/// - **Lifecycle Errors**: timeouts and shutdown in progress
///
/// # Examples
///
/// ```rust
/// use elector_core::ElectorError;
///
/// let error = ElectorError::backend("connection refused");
/// if error.is_retryable() {
///     println!("This error can be retried");
/// }
/// ```
#[derive(Error, Debug)]
pub enum ElectorError {
    /// Invalid identity or election parameters
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The lock record does not exist in the backend
    #[error("Lock record {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// Optimistic concurrency check failed
    #[error("Version conflict on {namespace}/{name}: {message}")]
    Conflict {
        namespace: String,
        name: String,
        message: String,
    },

    /// Transient failure talking to the lock backend
    #[error("Lock backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Operation exceeded its time budget
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// Cancellation observed mid-operation
    #[error("Shutdown in progress")]
    Shutdown,

    /// Stored lock record failed its integrity check
    #[error("Lock record corrupted: {details}")]
    Corruption { details: String },

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the Elector crates.
///
/// # Examples
///
/// ```rust
/// use elector_core::{ElectorError, Result};
///
/// fn check(name: &str) -> Result<()> {
///     if name.is_empty() {
///         return Err(ElectorError::config("name cannot be empty"));
///     }
///     Ok(())
/// }
/// assert!(check("").is_err());
/// ```
pub type Result<T> = std::result::Result<T, ElectorError>;

impl ElectorError {
    /// Creates a new configuration error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use elector_core::ElectorError;
    ///
    /// let error = ElectorError::config("--id cannot be empty");
    /// assert!(error.is_config());
    /// ```
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new backend-unavailable error with the given message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Creates a not-found error for the given record key.
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a version conflict error for the given record key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use elector_core::ElectorError;
    ///
    /// let error = ElectorError::conflict("default", "my-election", "expected version 3");
    /// assert!(error.is_conflict());
    /// assert!(!error.is_retryable());
    /// ```
    pub fn conflict(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a new corruption error with the given details.
    pub fn corruption(details: impl Into<String>) -> Self {
        Self::Corruption {
            details: details.into(),
        }
    }

    /// Creates a new timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for optimistic concurrency failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` when the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for configuration errors, the only fatal category.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Determines if this error condition is transient.
    ///
    /// Conflicts are not retryable as-is: another candidate wrote the
    /// record, and the caller must re-read it before trying again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use elector_core::ElectorError;
    ///
    /// assert!(ElectorError::backend("connection reset").is_retryable());
    /// assert!(!ElectorError::config("bad identity").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conflict = ElectorError::conflict("default", "e1", "stale version");
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());

        let missing = ElectorError::not_found("default", "e1");
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let io = ElectorError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(io.is_retryable());

        let timeout = ElectorError::timeout("write guard on default/e1");
        assert!(timeout.is_retryable());
        assert_eq!(
            timeout.to_string(),
            "Timeout occurred: write guard on default/e1"
        );
    }

    #[test]
    fn test_error_display() {
        let error = ElectorError::not_found("kube-system", "scheduler");
        assert_eq!(
            error.to_string(),
            "Lock record kube-system/scheduler not found"
        );
        assert_eq!(ElectorError::Shutdown.to_string(), "Shutdown in progress");
    }
}
