//! Protocol events and their server-sent-events encoding.
//!
//! Each frame is `data: <json>\n\n`, where the JSON object carries a `type`
//! discriminator plus the event's fields. The terminal `stream_end` event is
//! written as the non-JSON sentinel `data: [DONE]\n\n`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tollgate_approval::ApprovalContext;
use tollgate_core::{CallId, MessageId, SuspensionId, ThreadId, Timestamp};
use tollgate_runtime::{ExecutionThread, ThreadState, ToolCallRef, ToolStatus};

use crate::error::{StreamError, StreamResult};

/// Payload of the terminal frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Machine-readable class of an [`StreamEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A tool call failed or was refused.
    ToolError,
    /// The engine reported a non-fatal step failure.
    ChainError,
    /// A trace event could not be translated.
    ProcessingError,
    /// The engine's trace died; the connection is ending.
    StreamError,
    /// An approval response could not be applied.
    ApprovalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::ToolError => "tool_error",
            Self::ChainError => "chain_error",
            Self::ProcessingError => "processing_error",
            Self::StreamError => "stream_error",
            Self::ApprovalError => "approval_error",
        };
        f.write_str(code)
    }
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The assistant began a user-facing message.
    AssistantStart {
        /// Thread.
        thread_id: ThreadId,
        /// Message being produced.
        message_id: MessageId,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// One token of the assistant message.
    AssistantToken {
        /// Thread.
        thread_id: ThreadId,
        /// Message the token belongs to.
        message_id: MessageId,
        /// Token text.
        content: String,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// The assistant message is complete.
    AssistantComplete {
        /// Thread.
        thread_id: ThreadId,
        /// Message.
        message_id: MessageId,
        /// Full text.
        content: String,
        /// Tool calls the message requested.
        #[serde(default)]
        tool_calls: Vec<ToolCallRef>,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// A tool call started executing.
    ToolStart {
        /// Thread.
        thread_id: ThreadId,
        /// Assistant message that requested the call.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        /// Call.
        tool_call_id: CallId,
        /// Tool.
        tool_name: String,
        /// Arguments.
        tool_input: Value,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// A tool call finished.
    ToolComplete {
        /// Thread.
        thread_id: ThreadId,
        /// Call.
        tool_call_id: CallId,
        /// Tool.
        tool_name: String,
        /// Structured result.
        tool_output: Value,
        /// Outcome class.
        status: ToolStatus,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// One call needs a human decision.
    ApprovalRequest {
        /// Thread.
        thread_id: ThreadId,
        /// Suspension the answer resumes.
        suspension_id: SuspensionId,
        /// Disclosure for the call.
        #[serde(flatten)]
        context: ApprovalContext,
        /// Answers after this are treated as denials.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<Timestamp>,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// Several calls of one turn need a human decision.
    BatchApprovalRequest {
        /// Thread.
        thread_id: ThreadId,
        /// Suspension the answers resume.
        suspension_id: SuspensionId,
        /// Disclosure for each call.
        requests: Vec<ApprovalContext>,
        /// Answers after this are treated as denials.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<Timestamp>,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// Something went wrong. Scoped to `tool_call_id` when present.
    Error {
        /// Thread.
        thread_id: ThreadId,
        /// Call the error belongs to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<CallId>,
        /// Error class.
        error_code: ErrorCode,
        /// Human-readable message.
        error_message: String,
        /// Extra structured context.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// The engine is idle; the connection is alive.
    KeepAlive {
        /// Thread.
        thread_id: ThreadId,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// Thread state at the start of a connection.
    ThreadSync {
        /// Thread.
        thread_id: ThreadId,
        /// Lifecycle state.
        state: ThreadState,
        /// Calls still waiting for a human.
        #[serde(default)]
        open_calls: Vec<CallId>,
        /// Emission time.
        timestamp: Timestamp,
    },
    /// Last frame of the connection.
    StreamEnd {
        /// Thread.
        thread_id: ThreadId,
        /// Emission time.
        timestamp: Timestamp,
    },
}

impl StreamEvent {
    /// An error event.
    #[must_use]
    pub fn error(
        thread_id: &ThreadId,
        error_code: ErrorCode,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::Error {
            thread_id: thread_id.clone(),
            tool_call_id: None,
            error_code,
            error_message: message.into(),
            details,
            timestamp: Timestamp::now(),
        }
    }

    /// A keep-alive event.
    #[must_use]
    pub fn keep_alive(thread_id: &ThreadId) -> Self {
        Self::KeepAlive {
            thread_id: thread_id.clone(),
            timestamp: Timestamp::now(),
        }
    }

    /// The terminal event.
    #[must_use]
    pub fn stream_end(thread_id: &ThreadId) -> Self {
        Self::StreamEnd {
            thread_id: thread_id.clone(),
            timestamp: Timestamp::now(),
        }
    }

    /// Snapshot of a thread's state.
    #[must_use]
    pub fn thread_sync(thread: &ExecutionThread) -> Self {
        Self::ThreadSync {
            thread_id: thread.id.clone(),
            state: thread.state,
            open_calls: thread.open_calls(),
            timestamp: Timestamp::now(),
        }
    }

    /// The `type` discriminator.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AssistantStart { .. } => "assistant_start",
            Self::AssistantToken { .. } => "assistant_token",
            Self::AssistantComplete { .. } => "assistant_complete",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolComplete { .. } => "tool_complete",
            Self::ApprovalRequest { .. } => "approval_request",
            Self::BatchApprovalRequest { .. } => "batch_approval_request",
            Self::Error { .. } => "error",
            Self::KeepAlive { .. } => "keep_alive",
            Self::ThreadSync { .. } => "thread_sync",
            Self::StreamEnd { .. } => "stream_end",
        }
    }

    /// Thread the event belongs to.
    #[must_use]
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::AssistantStart { thread_id, .. }
            | Self::AssistantToken { thread_id, .. }
            | Self::AssistantComplete { thread_id, .. }
            | Self::ToolStart { thread_id, .. }
            | Self::ToolComplete { thread_id, .. }
            | Self::ApprovalRequest { thread_id, .. }
            | Self::BatchApprovalRequest { thread_id, .. }
            | Self::Error { thread_id, .. }
            | Self::KeepAlive { thread_id, .. }
            | Self::ThreadSync { thread_id, .. }
            | Self::StreamEnd { thread_id, .. } => thread_id,
        }
    }

    /// Call the event is scoped to, if any.
    #[must_use]
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::ToolStart { tool_call_id, .. } | Self::ToolComplete { tool_call_id, .. } => {
                Some(tool_call_id)
            },
            Self::ApprovalRequest { context, .. } => Some(&context.tool_call_id),
            Self::Error { tool_call_id, .. } => tool_call_id.as_ref(),
            Self::AssistantStart { .. }
            | Self::AssistantToken { .. }
            | Self::AssistantComplete { .. }
            | Self::BatchApprovalRequest { .. }
            | Self::KeepAlive { .. }
            | Self::ThreadSync { .. }
            | Self::StreamEnd { .. } => None,
        }
    }

    /// Whether this is the last frame of a connection.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd { .. })
    }
}

/// An event together with its encoded `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    event: StreamEvent,
    data: String,
}

impl SseFrame {
    /// Encode an event.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Encoding`] if the event cannot be serialized.
    pub fn encode(event: StreamEvent) -> StreamResult<Self> {
        let data = if event.is_terminal() {
            DONE_SENTINEL.to_string()
        } else {
            serde_json::to_string(&event).map_err(|e| StreamError::Encoding {
                event_type: event.event_type(),
                message: e.to_string(),
            })?
        };
        Ok(Self { event, data })
    }

    /// The event.
    #[must_use]
    pub fn event(&self) -> &StreamEvent {
        &self.event
    }

    /// Consume the frame, returning the event.
    #[must_use]
    pub fn into_event(self) -> StreamEvent {
        self.event
    }

    /// The `data:` payload: JSON, or [`DONE_SENTINEL`].
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// The frame as written to the wire.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("data: {}\n\n", self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tollgate_approval::{SimilarHistory, ToolPolicy};
    use tollgate_core::PendingToolInvocation;

    fn thread() -> ThreadId {
        ThreadId::from("t-1")
    }

    #[test]
    fn test_token_frame_wire_shape() {
        let message_id = MessageId::new();
        let frame = SseFrame::encode(StreamEvent::AssistantToken {
            thread_id: thread(),
            message_id,
            content: "Hel".into(),
            timestamp: Timestamp::now(),
        })
        .unwrap();

        let wire = frame.to_wire();
        assert!(wire.starts_with("data: {"));
        assert!(wire.ends_with("}\n\n"));

        let json: Value = serde_json::from_str(frame.data()).unwrap();
        assert_eq!(json["type"], "assistant_token");
        assert_eq!(json["thread_id"], "t-1");
        assert_eq!(json["content"], "Hel");
        assert_eq!(json["message_id"], message_id.to_string());
    }

    #[test]
    fn test_stream_end_is_sentinel() {
        let frame = SseFrame::encode(StreamEvent::stream_end(&thread())).unwrap();
        assert_eq!(frame.data(), DONE_SENTINEL);
        assert_eq!(frame.to_wire(), "data: [DONE]\n\n");
        assert!(frame.event().is_terminal());
    }

    #[test]
    fn test_approval_request_flattens_context() {
        let call = PendingToolInvocation::new(
            "obp_requests",
            CallId::from("call_1"),
            json!({"method": "POST", "path": "/banks/x/accounts"}),
            MessageId::new(),
        );
        let context = ApprovalContext::build(
            &ToolPolicy::new("obp_requests"),
            &call,
            SimilarHistory::default(),
        );
        let event = StreamEvent::ApprovalRequest {
            thread_id: thread(),
            suspension_id: SuspensionId::new(),
            context,
            deadline: None,
            timestamp: Timestamp::now(),
        };
        assert_eq!(event.call_id().map(CallId::as_str), Some("call_1"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "approval_request");
        assert_eq!(json["tool_name"], "obp_requests");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["message"], "Approve POST request to /banks/x/accounts?");
        assert!(json.get("deadline").is_none());
    }

    #[test]
    fn test_error_event_fields() {
        let event = StreamEvent::error(
            &thread(),
            ErrorCode::StreamError,
            "engine died",
            Some(json!({"attempt": 1})),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error_code"], "stream_error");
        assert_eq!(json["error_message"], "engine died");
        assert_eq!(json["details"]["attempt"], 1);
        assert!(json.get("tool_call_id").is_none());
        assert_eq!(ErrorCode::ApprovalError.to_string(), "approval_error");
    }

    #[test]
    fn test_thread_sync_from_thread() {
        let mut thread = ExecutionThread::new(thread());
        thread.state = ThreadState::Running;
        let event = StreamEvent::thread_sync(&thread);
        assert_eq!(event.event_type(), "thread_sync");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["open_calls"], json!([]));
    }
}
