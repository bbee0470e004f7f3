/// Errors that can occur while deciding on or recording approvals.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// An `always_deny` rule matched. Terminal, never retried.
    #[error("blocked by policy: {tool} - {reason}")]
    PolicyViolation {
        /// The tool whose call was blocked.
        tool: String,
        /// The reason for blocking.
        reason: String,
    },

    /// The tool is not in the catalog.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A rule could not be compiled.
    #[error("invalid rule for {tool}: {message}")]
    InvalidRule {
        /// Tool the rule belongs to.
        tool: String,
        /// What was wrong with it.
        message: String,
    },

    /// The record store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored record could not be decoded.
    #[error("corrupted approval record at {key}: {message}")]
    CorruptedRecord {
        /// Namespace and key of the record.
        key: String,
        /// Decoder message.
        message: String,
    },
}

impl From<tollgate_storage::StorageError> for ApprovalError {
    fn from(e: tollgate_storage::StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
