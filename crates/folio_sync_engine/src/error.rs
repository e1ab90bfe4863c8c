//! Error types for the sync engine.

use folio_sync_protocol::{Revision, VersionedValue};
use thiserror::Error;

/// Result type for versioned-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by a versioned store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A compare-and-swap write failed against a stale expected
    /// revision. Carries the actual current revision and, when the
    /// transport makes it available, the actual current value.
    #[error("conflict: remote is at revision {revision}")]
    Conflict {
        /// The remote's actual current revision.
        revision: Revision,
        /// The remote's actual current value, when available.
        current: Option<VersionedValue<serde_json::Value>>,
    },

    /// Network or server failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The key does not exist. Domain logic that expects
    /// possibly-missing keys treats this as an absent value, not a
    /// failure.
    #[error("key not found")]
    NotFound,

    /// The stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport { retryable, .. } => *retryable,
            StoreError::Conflict { .. } => true,
            _ => false,
        }
    }

    /// Short error kind for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Conflict { .. } => "conflict",
            StoreError::Transport { .. } => "transport",
            StoreError::NotFound => "not_found",
            StoreError::Codec(_) => "codec",
        }
    }
}

/// Errors reported by a local repository.
#[derive(Error, Debug)]
#[error("repository error: {0}")]
pub struct RepoError(pub String);

impl RepoError {
    /// Creates a repository error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur during sync operations.
///
/// These never escape the engine's orchestration methods: per-key and
/// per-domain failures are caught and logged, leaving the affected
/// keys dirty for the next cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Versioned-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local repository failure.
    #[error(transparent)]
    Repository(#[from] RepoError),

    /// Payload (de)serialization failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SyncError {
    /// Short error kind for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Store(e) => e.kind(),
            SyncError::Repository(_) => "repository",
            SyncError::Codec(_) => "codec",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::transport_retryable("connection lost").is_retryable());
        assert!(!StoreError::transport_fatal("invalid certificate").is_retryable());
        assert!(StoreError::Conflict {
            revision: Revision::new("r2"),
            current: None,
        }
        .is_retryable());
        assert!(!StoreError::NotFound.is_retryable());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(StoreError::NotFound.kind(), "not_found");
        assert_eq!(
            SyncError::from(StoreError::transport_retryable("down")).kind(),
            "transport"
        );
        assert_eq!(SyncError::from(RepoError::new("disk full")).kind(), "repository");
    }

    #[test]
    fn error_display() {
        let err = StoreError::Conflict {
            revision: Revision::new("r9"),
            current: None,
        };
        assert!(err.to_string().contains("r9"));

        let err = RepoError::new("locked");
        assert_eq!(err.to_string(), "repository error: locked");
    }
}
