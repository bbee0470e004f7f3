//! Storage error types.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend failed, e.g. a poisoned lock.
    #[error("storage error: {0}")]
    Internal(String),

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The namespace or key is empty or contains a null byte.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Whether the failure may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
