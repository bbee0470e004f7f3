//! Stream event translator.
//!
//! A [`Translator`] turns the engine's raw [`TraceEvent`]s into protocol
//! [`StreamEvent`]s for one thread. It keeps the per-thread bookkeeping that
//! must survive across connections of a suspended turn: the current
//! assistant message and the tool calls still in flight.
//!
//! Ordering guarantees for one assistant message:
//!
//! 1. `AssistantStart` is emitted before the first `AssistantToken`
//! 2. `AssistantComplete` is emitted after the last token
//! 3. a failed tool produces an `Error` immediately before its `ToolComplete`
//! 4. after a suspension's approval request nothing else is emitted until
//!    the turn is resumed

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Value, json};

use tollgate_core::{CallId, MessageId, ThreadId, Timestamp};
use tollgate_runtime::coordinator::CANCELLED_REASON;
use tollgate_runtime::trace::tool_error_message;
use tollgate_runtime::{HistoryEntry, SuspendSignal, ToolCallRef, ToolStatus, TraceEvent, TraceKind};

use crate::error::{StreamError, StreamResult};
use crate::event::{ErrorCode, StreamEvent};

/// How graph nodes are treated by the translator.
///
/// An empty `assistant` set makes every non-internal node user-facing; an
/// empty `tools` set accepts tool events from every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRoles {
    internal: HashSet<String>,
    assistant: HashSet<String>,
    tools: HashSet<String>,
}

impl NodeRoles {
    /// Roles with no restrictions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes whose model output is never shown.
    #[must_use]
    pub fn with_internal<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.internal.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Nodes that produce user-facing assistant messages.
    #[must_use]
    pub fn with_assistant<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assistant.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Nodes whose tool events are narrated.
    #[must_use]
    pub fn with_tools<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Whether model output from `node` is shown to the user.
    #[must_use]
    pub fn is_user_facing(&self, node: &str) -> bool {
        !self.internal.contains(node) && (self.assistant.is_empty() || self.assistant.contains(node))
    }

    /// Whether tool events from `node` are narrated.
    #[must_use]
    pub fn is_tool_node(&self, node: &str) -> bool {
        self.tools.is_empty() || self.tools.contains(node)
    }
}

#[derive(Debug, Clone)]
struct OpenMessage {
    id: MessageId,
    content: String,
}

#[derive(Debug, Clone)]
struct InFlightCall {
    tool: String,
    started_at: Timestamp,
}

/// Translates one thread's trace into protocol events.
#[derive(Debug)]
pub struct Translator {
    thread_id: ThreadId,
    roles: Arc<NodeRoles>,
    message: Option<OpenMessage>,
    last_message_id: Option<MessageId>,
    in_flight: HashMap<CallId, InFlightCall>,
    tokens: u64,
    halted: bool,
    history: Vec<HistoryEntry>,
}

impl Translator {
    /// A translator with empty state.
    #[must_use]
    pub fn new(thread_id: ThreadId, roles: Arc<NodeRoles>) -> Self {
        Self {
            thread_id,
            roles,
            message: None,
            last_message_id: None,
            in_flight: HashMap::new(),
            tokens: 0,
            halted: false,
            history: Vec::new(),
        }
    }

    /// The thread.
    #[must_use]
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Whether an approval request ended the turn's output.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Tokens emitted since the last reset.
    #[must_use]
    pub fn tokens_emitted(&self) -> u64 {
        self.tokens
    }

    /// The open assistant message, or the last completed one.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.message.as_ref().map(|m| m.id).or(self.last_message_id)
    }

    /// Calls that started and have not finished, sorted.
    #[must_use]
    pub fn in_flight(&self) -> Vec<CallId> {
        let mut calls: Vec<CallId> = self.in_flight.keys().cloned().collect();
        calls.sort();
        calls
    }

    /// Clear per-turn state before a new user message.
    pub fn reset(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::debug!(
                thread_id = %self.thread_id,
                dropped = self.in_flight.len(),
                "discarding in-flight calls from previous turn"
            );
        }
        self.message = None;
        self.last_message_id = None;
        self.in_flight.clear();
        self.tokens = 0;
        self.halted = false;
        self.history.clear();
    }

    /// Continue a suspended turn. Message and call bookkeeping is kept.
    pub fn begin_resume(&mut self) {
        self.halted = false;
    }

    /// History entries produced since the last call.
    pub fn take_history(&mut self) -> Vec<HistoryEntry> {
        std::mem::take(&mut self.history)
    }

    /// Close calls the coordinator repaired as orphans.
    ///
    /// Each produces an `Error` followed by an error `ToolComplete`, so the
    /// client's view of the call is closed too.
    pub fn recover_orphans(&mut self, repaired: &[ToolCallRef]) -> Vec<StreamEvent> {
        let mut out = Vec::with_capacity(repaired.len().saturating_mul(2));
        for call in repaired {
            self.in_flight.remove(&call.call_id);
            out.push(StreamEvent::Error {
                thread_id: self.thread_id.clone(),
                tool_call_id: Some(call.call_id.clone()),
                error_code: ErrorCode::ToolError,
                error_message: format!("tool call {} was {CANCELLED_REASON}", call.call_id),
                details: Some(json!({ "tool_name": call.tool })),
                timestamp: Timestamp::now(),
            });
            out.push(StreamEvent::ToolComplete {
                thread_id: self.thread_id.clone(),
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool.clone(),
                tool_output: json!({ "status": "error", "error": CANCELLED_REASON }),
                status: ToolStatus::Error,
                timestamp: Timestamp::now(),
            });
        }
        out
    }

    /// Translate one trace event.
    ///
    /// An event with an unexpected shape becomes a `processing_error` event
    /// and translation continues with the next one.
    pub fn translate(&mut self, event: &TraceEvent) -> Vec<StreamEvent> {
        if self.halted {
            tracing::debug!(thread_id = %self.thread_id, kind = %event.kind, "dropping trace event after suspension");
            return Vec::new();
        }
        match self.apply(event) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    thread_id = %self.thread_id,
                    kind = %event.kind,
                    node = %event.node_name,
                    error = %e,
                    "trace event not translated"
                );
                vec![StreamEvent::error(
                    &self.thread_id,
                    ErrorCode::ProcessingError,
                    format!("Error processing stream event: {e}"),
                    Some(json!({ "kind": event.kind, "node_name": event.node_name })),
                )]
            },
        }
    }

    fn apply(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        match event.kind {
            TraceKind::ChatModelStart => Ok(Vec::new()),
            TraceKind::ChatModelStream => self.on_token(event),
            TraceKind::ChatModelEnd => self.on_model_end(event),
            TraceKind::ToolStart => self.on_tool_start(event),
            TraceKind::ToolEnd => self.on_tool_end(event),
            TraceKind::ChainError => {
                let message = event.payload_str("message").unwrap_or("An error occurred");
                Ok(vec![StreamEvent::error(
                    &self.thread_id,
                    ErrorCode::ChainError,
                    message,
                    Some(json!({ "node_name": event.node_name })),
                )])
            },
            TraceKind::Interrupt => self.on_interrupt(event),
        }
    }

    fn open_message(&mut self, out: &mut Vec<StreamEvent>) -> &mut OpenMessage {
        let thread_id = &self.thread_id;
        self.message.get_or_insert_with(|| {
            let id = MessageId::new();
            out.push(StreamEvent::AssistantStart {
                thread_id: thread_id.clone(),
                message_id: id,
                timestamp: Timestamp::now(),
            });
            OpenMessage {
                id,
                content: String::new(),
            }
        })
    }

    fn on_token(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        let token = required_str(event, "token")?;
        if token.is_empty() || !self.roles.is_user_facing(&event.node_name) {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(2);
        let message = self.open_message(&mut out);
        message.content.push_str(token);
        let message_id = message.id;

        out.push(StreamEvent::AssistantToken {
            thread_id: self.thread_id.clone(),
            message_id,
            content: token.to_string(),
            timestamp: Timestamp::now(),
        });
        self.tokens = self.tokens.saturating_add(1);
        Ok(out)
    }

    fn on_model_end(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        if !self.roles.is_user_facing(&event.node_name) {
            return Ok(Vec::new());
        }
        let tool_calls =
            parse_tool_calls(&event.payload).map_err(|m| StreamError::translation(event.kind, m))?;

        let mut out = Vec::with_capacity(2);
        let message = self.open_message(&mut out);
        let streamed = std::mem::take(&mut message.content);
        let message_id = message.id;
        let content = event
            .payload_str("content")
            .map_or(streamed, str::to_string);

        self.message = None;
        self.last_message_id = Some(message_id);

        out.push(StreamEvent::AssistantComplete {
            thread_id: self.thread_id.clone(),
            message_id,
            content: content.clone(),
            tool_calls: tool_calls.clone(),
            timestamp: Timestamp::now(),
        });
        self.history.push(HistoryEntry::Assistant {
            message_id,
            content,
            tool_calls,
            at: Timestamp::now(),
        });
        Ok(out)
    }

    fn on_tool_start(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        if !self.roles.is_tool_node(&event.node_name) {
            tracing::trace!(thread_id = %self.thread_id, node = %event.node_name, "ignoring tool start from non-tool node");
            return Ok(Vec::new());
        }
        let call_id = CallId::from(required_str(event, "call_id")?);
        let tool = required_str(event, "tool")?.to_string();
        let input = event.payload.get("input").cloned().unwrap_or(Value::Null);

        self.in_flight.insert(
            call_id.clone(),
            InFlightCall {
                tool: tool.clone(),
                started_at: Timestamp::now(),
            },
        );
        tracing::debug!(thread_id = %self.thread_id, call_id = %call_id, tool = %tool, "tool started");

        Ok(vec![StreamEvent::ToolStart {
            thread_id: self.thread_id.clone(),
            message_id: self.last_message_id,
            tool_call_id: call_id,
            tool_name: tool,
            tool_input: input,
            timestamp: Timestamp::now(),
        }])
    }

    fn on_tool_end(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        if !self.roles.is_tool_node(&event.node_name) {
            tracing::trace!(thread_id = %self.thread_id, node = %event.node_name, "ignoring tool end from non-tool node");
            return Ok(Vec::new());
        }
        let call_id = CallId::from(required_str(event, "call_id")?);
        let started = self.in_flight.remove(&call_id);
        let tool = match (event.payload_str("tool"), &started) {
            (Some(tool), _) => tool.to_string(),
            (None, Some(started)) => started.tool.clone(),
            (None, None) => return Err(StreamError::translation(event.kind, "missing field 'tool'")),
        };
        let output = event.payload.get("output").cloned().unwrap_or(Value::Null);
        let status = ToolStatus::classify(&output);

        match &started {
            Some(started) => tracing::debug!(
                thread_id = %self.thread_id,
                call_id = %call_id,
                tool = %tool,
                status = %status,
                elapsed = ?started.started_at.age(),
                "tool finished"
            ),
            None => tracing::debug!(thread_id = %self.thread_id, call_id = %call_id, "tool finished without a recorded start"),
        }

        let mut out = Vec::with_capacity(2);
        if status.is_error() {
            let message = tool_error_message(&output).unwrap_or_else(|| format!("tool {tool} failed"));
            out.push(StreamEvent::Error {
                thread_id: self.thread_id.clone(),
                tool_call_id: Some(call_id.clone()),
                error_code: ErrorCode::ToolError,
                error_message: message,
                details: Some(json!({ "tool_name": tool })),
                timestamp: Timestamp::now(),
            });
        }
        out.push(StreamEvent::ToolComplete {
            thread_id: self.thread_id.clone(),
            tool_call_id: call_id.clone(),
            tool_name: tool.clone(),
            tool_output: output.clone(),
            status,
            timestamp: Timestamp::now(),
        });
        self.history.push(HistoryEntry::ToolResult {
            call_id,
            tool,
            status,
            output,
            at: Timestamp::now(),
        });
        Ok(out)
    }

    fn on_interrupt(&mut self, event: &TraceEvent) -> StreamResult<Vec<StreamEvent>> {
        let signal: SuspendSignal = serde_json::from_value(event.payload.clone())
            .map_err(|e| StreamError::translation(event.kind, e.to_string()))?;
        let SuspendSignal {
            suspension_id,
            mut requests,
            deadline,
            ..
        } = signal;

        let awaiting = requests.len();
        let request = if awaiting > 1 {
            StreamEvent::BatchApprovalRequest {
                thread_id: self.thread_id.clone(),
                suspension_id,
                requests,
                deadline,
                timestamp: Timestamp::now(),
            }
        } else if let Some(context) = requests.pop() {
            StreamEvent::ApprovalRequest {
                thread_id: self.thread_id.clone(),
                suspension_id,
                context,
                deadline,
                timestamp: Timestamp::now(),
            }
        } else {
            return Err(StreamError::translation(event.kind, "suspension lists no calls"));
        };

        self.halted = true;
        tracing::info!(
            thread_id = %self.thread_id,
            suspension_id = %suspension_id,
            awaiting,
            "approval requested"
        );
        Ok(vec![request])
    }
}

fn required_str<'a>(event: &'a TraceEvent, field: &str) -> StreamResult<&'a str> {
    event
        .payload_str(field)
        .ok_or_else(|| StreamError::translation(event.kind, format!("missing field '{field}'")))
}

fn parse_tool_calls(payload: &Value) -> Result<Vec<ToolCallRef>, String> {
    let items = match payload.get("tool_calls") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err("tool_calls is not an array".to_string()),
    };
    items
        .iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or("tool call without id")?;
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or("tool call without name")?;
            Ok(ToolCallRef {
                call_id: CallId::from(id),
                tool: name.to_string(),
                arguments: item.get("args").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "translator_tests.rs"]
mod tests;
