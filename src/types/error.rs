//! Error types for the cache core
//!
//! Only [`CacheError`] is ever returned as a hard `Err` from public
//! operations. Chunk and commit failures are recovered per unit of work and
//! reported through [`FetchError`] and [`CommitError`].

use std::time::Duration;

/// Errors reported by a [`RemoteStore`](crate::remote::RemoteStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote store rejected request: {0}")]
    Rejected(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Remote store error: {0}")]
    Internal(String),
}

/// Failure of a single batch chunk. Shared by every key of the chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Chunk fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Chunk fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Chunk fetch cancelled")]
    Cancelled,
}

/// Failure of an optimistic mutation's remote write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("Commit failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Commit timed out after {0:?}")]
    Timeout(Duration),

    #[error("Commit cancelled")]
    Cancelled,

    #[error("Mutation rejected: {0}")]
    Rejected(#[from] CacheError),
}

/// Caller misuse. These indicate a programming error, not a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Batch of {len} exceeds limit of {limit}")]
    BatchLimitExceeded { len: usize, limit: usize },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Coordinator has been disposed")]
    Disposed,
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for cache core operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_converts_into_unit_errors() {
        let remote = RemoteError::Unavailable("offline".into());

        let fetch: FetchError = remote.clone().into();
        assert_eq!(fetch, FetchError::Remote(remote.clone()));

        let commit: CommitError = remote.into();
        assert!(commit.to_string().contains("offline"));
    }

    #[test]
    fn test_serde_error_is_caller_misuse() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let cache_err: CacheError = err.into();
        assert!(matches!(cache_err, CacheError::Serialization(_)));
    }
}
