//! Runtime error types.

use thiserror::Error;

use tollgate_approval::ApprovalError;
use tollgate_storage::StorageError;

/// Errors raised by the suspend/resume coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A resume arrived for a thread with nothing to resume.
    #[error("thread {thread_id} is not awaiting approval")]
    NotSuspended {
        /// The thread.
        thread_id: String,
    },

    /// A turn tried to suspend a thread that is already suspended.
    #[error("thread {thread_id} is already awaiting approval")]
    AlreadySuspended {
        /// The thread.
        thread_id: String,
    },

    /// Another resume for the same thread is being applied.
    #[error("a resume is already in flight for thread {thread_id}")]
    ResumeInFlight {
        /// The thread.
        thread_id: String,
    },

    /// A decision named a call that is not part of the suspension.
    #[error("call {call_id} is not awaiting approval")]
    UnknownCall {
        /// The call.
        call_id: String,
    },

    /// A call was moved through an impossible state change.
    #[error("call {call_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The call.
        call_id: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// The human answered after the suspension deadline.
    #[error("approval wait timed out for thread {thread_id}")]
    ApprovalWaitTimeout {
        /// The thread.
        thread_id: String,
    },

    /// The thread store failed.
    #[error("thread store error: {0}")]
    Store(String),

    /// The decision engine failed.
    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),
}

impl From<StorageError> for CoordinatorError {
    fn from(e: StorageError) -> Self {
        Self::Store(e.to_string())
    }
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors raised by an execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not start the turn.
    #[error("engine failed to start: {0}")]
    Startup(String),

    /// The trace stream died mid-turn.
    #[error("engine stream failed: {0}")]
    Stream(String),

    /// The tool gate refused to review the calls.
    #[error("tool gate failed: {0}")]
    Gate(#[from] CoordinatorError),

    /// A trace payload could not be encoded.
    #[error("trace encoding failed: {0}")]
    Encoding(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
