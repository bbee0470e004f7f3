//! Stream error types.

use thiserror::Error;

use tollgate_runtime::{CoordinatorError, EngineError};

/// Errors raised while translating and delivering a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A trace event did not have the expected shape.
    #[error("cannot translate {kind} event: {message}")]
    Translation {
        /// Trace kind that failed.
        kind: String,
        /// What was wrong.
        message: String,
    },

    /// The execution engine failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The coordinator rejected an operation.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// An event could not be encoded for the wire.
    #[error("cannot encode {event_type} event: {message}")]
    Encoding {
        /// Event type.
        event_type: &'static str,
        /// Serializer message.
        message: String,
    },

    /// The client severed the connection.
    #[error("event sink closed")]
    SinkClosed,
}

impl StreamError {
    /// Shorthand for a translation error.
    pub(crate) fn translation(kind: impl ToString, message: impl Into<String>) -> Self {
        Self::Translation {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
