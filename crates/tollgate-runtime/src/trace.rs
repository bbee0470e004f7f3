//! Raw execution trace produced by an [`ExecutionEngine`](crate::ExecutionEngine).
//!
//! Each [`TraceEvent`] is `{kind, node_name, payload}`. The payload shape
//! depends on the kind:
//!
//! | Kind | Payload |
//! |------|---------|
//! | `chat_model_start` | `{}` |
//! | `chat_model_stream` | `{"token": "..."}` |
//! | `chat_model_end` | `{"content": "...", "tool_calls": [{"id", "name", "args"}]}` |
//! | `tool_start` | `{"call_id", "tool", "input"}` |
//! | `tool_end` | `{"call_id", "tool", "output"}` |
//! | `chain_error` | `{"message": "..."}` |
//! | `interrupt` | a serialized [`SuspendSignal`] |

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::coordinator::SuspendSignal;
use crate::error::{EngineError, EngineResult};

/// What happened in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// A model call began.
    ChatModelStart,
    /// A model call produced a token.
    ChatModelStream,
    /// A model call finished.
    ChatModelEnd,
    /// A tool began executing.
    ToolStart,
    /// A tool finished executing.
    ToolEnd,
    /// A chain step failed without killing the stream.
    ChainError,
    /// The turn suspended for human approval. Always the last event.
    Interrupt,
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChatModelStart => "chat_model_start",
            Self::ChatModelStream => "chat_model_stream",
            Self::ChatModelEnd => "chat_model_end",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::ChainError => "chain_error",
            Self::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}

/// One raw trace notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Event kind.
    pub kind: TraceKind,
    /// Graph node that produced the event.
    pub node_name: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl TraceEvent {
    /// Create an event.
    #[must_use]
    pub fn new(kind: TraceKind, node_name: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            node_name: node_name.into(),
            payload,
        }
    }

    /// A model call began.
    #[must_use]
    pub fn model_start(node_name: impl Into<String>) -> Self {
        Self::new(TraceKind::ChatModelStart, node_name, json!({}))
    }

    /// A model token.
    #[must_use]
    pub fn token(node_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(
            TraceKind::ChatModelStream,
            node_name,
            json!({ "token": token.into() }),
        )
    }

    /// A model call finished with `content` and the tool calls it requested.
    #[must_use]
    pub fn model_end(node_name: impl Into<String>, content: impl Into<String>, tool_calls: Vec<Value>) -> Self {
        Self::new(
            TraceKind::ChatModelEnd,
            node_name,
            json!({ "content": content.into(), "tool_calls": tool_calls }),
        )
    }

    /// A tool began.
    #[must_use]
    pub fn tool_start(node_name: impl Into<String>, call_id: &str, tool: &str, input: Value) -> Self {
        Self::new(
            TraceKind::ToolStart,
            node_name,
            json!({ "call_id": call_id, "tool": tool, "input": input }),
        )
    }

    /// A tool finished with a structured `output`.
    #[must_use]
    pub fn tool_end(node_name: impl Into<String>, call_id: &str, tool: &str, output: Value) -> Self {
        Self::new(
            TraceKind::ToolEnd,
            node_name,
            json!({ "call_id": call_id, "tool": tool, "output": output }),
        )
    }

    /// A non-fatal chain failure.
    #[must_use]
    pub fn chain_error(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            TraceKind::ChainError,
            node_name,
            json!({ "message": message.into() }),
        )
    }

    /// The turn suspended.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Encoding`] if the signal cannot be serialized.
    pub fn interrupt(node_name: impl Into<String>, signal: &SuspendSignal) -> EngineResult<Self> {
        let payload = serde_json::to_value(signal).map_err(|e| EngineError::Encoding(e.to_string()))?;
        Ok(Self::new(TraceKind::Interrupt, node_name, payload))
    }

    /// String field of the payload.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// A tool call requested by the model, as carried in `chat_model_end`.
#[must_use]
pub fn tool_call(id: &str, name: &str, args: Value) -> Value {
    json!({ "id": id, "name": name, "args": args })
}

/// Outcome class of a finished tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The tool did what it was asked.
    Success,
    /// The tool failed or was refused.
    Error,
}

impl ToolStatus {
    /// Classify a structured tool result.
    ///
    /// A result is an error when it has `"status": "error"`, a non-null
    /// `error` field, or `"is_error": true`.
    #[must_use]
    pub fn classify(output: &Value) -> Self {
        let flagged = output.get("status").and_then(Value::as_str) == Some("error")
            || output.get("error").is_some_and(|e| !e.is_null())
            || output.get("is_error").and_then(Value::as_bool) == Some(true);
        if flagged { Self::Error } else { Self::Success }
    }

    /// Whether this is [`ToolStatus::Error`].
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Error message carried by a structured tool result, if any.
#[must_use]
pub fn tool_error_message(output: &Value) -> Option<String> {
    match output.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => output
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(other) => Some(other.to_string()),
    }
}
