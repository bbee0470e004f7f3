//! Execution threads: durable per-conversation state.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tollgate_approval::ApprovalContext;
use tollgate_core::{ApprovalScope, CallId, MessageId, SuspensionId, ThreadId, Timestamp};

use crate::call::TrackedCall;
use crate::coordinator::ResumeOutcome;
use crate::trace::ToolStatus;

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    /// A turn is executing.
    Running,
    /// A turn is suspended waiting for a human.
    AwaitingApproval,
    /// No turn is executing.
    Done,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    /// Call id.
    pub call_id: CallId,
    /// Tool name.
    pub tool: String,
    /// Arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// One entry of a thread's turn history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// A user message.
    User {
        /// Message id.
        message_id: MessageId,
        /// Text.
        content: String,
        /// When it arrived.
        at: Timestamp,
    },
    /// An assistant message, possibly requesting tool calls.
    Assistant {
        /// Message id.
        message_id: MessageId,
        /// Text.
        content: String,
        /// Requested calls.
        #[serde(default)]
        tool_calls: Vec<ToolCallRef>,
        /// When it completed.
        at: Timestamp,
    },
    /// The terminal record of a tool call.
    ToolResult {
        /// The call this settles.
        call_id: CallId,
        /// Tool name.
        tool: String,
        /// Outcome class.
        status: ToolStatus,
        /// Structured result.
        output: Value,
        /// When it finished.
        at: Timestamp,
    },
}

impl HistoryEntry {
    /// A user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            message_id: MessageId::new(),
            content: content.into(),
            at: Timestamp::now(),
        }
    }

    /// A synthesized error result for a call that never finished.
    #[must_use]
    pub fn cancelled_result(call: &ToolCallRef, reason: &str) -> Self {
        Self::ToolResult {
            call_id: call.call_id.clone(),
            tool: call.tool.clone(),
            status: ToolStatus::Error,
            output: serde_json::json!({ "status": "error", "error": reason }),
            at: Timestamp::now(),
        }
    }
}

/// A turn paused for human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    /// Suspension id.
    pub id: SuspensionId,
    /// Every call of the turn, settled or awaiting.
    pub calls: Vec<TrackedCall>,
    /// Disclosure for each awaiting call, in call order.
    pub contexts: Vec<ApprovalContext>,
    /// When the turn suspended.
    pub created_at: Timestamp,
    /// After this, answers are treated as denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

impl Suspension {
    /// Ids of calls still waiting for a human.
    #[must_use]
    pub fn awaiting(&self) -> Vec<CallId> {
        self.calls
            .iter()
            .filter(|c| c.is_awaiting())
            .map(|c| c.call.call_id.clone())
            .collect()
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_overdue(&self) -> bool {
        self.deadline.is_some_and(|d| d.is_past())
    }

    /// `requested` if it was offered for `call_id`, otherwise
    /// [`ApprovalScope::Once`].
    #[must_use]
    pub fn granted_scope(&self, call_id: &CallId, requested: ApprovalScope) -> ApprovalScope {
        let offered = self
            .contexts
            .iter()
            .find(|c| &c.tool_call_id == call_id)
            .is_some_and(|c| c.offered_scopes.contains(&requested));
        if offered { requested } else { ApprovalScope::Once }
    }
}

/// The last applied resume, kept for idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Suspension the resume closed.
    pub suspension_id: SuspensionId,
    /// Outcome that was returned.
    pub outcome: ResumeOutcome,
    /// When it was applied.
    pub applied_at: Timestamp,
}

/// Durable state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionThread {
    /// Thread id.
    pub id: ThreadId,
    /// Lifecycle state.
    pub state: ThreadState,
    /// Turn history.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Open suspension, present iff `state` is `AwaitingApproval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    /// Last applied resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resume: Option<ResumeRecord>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl ExecutionThread {
    /// A fresh thread with no history.
    #[must_use]
    pub fn new(id: ThreadId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            state: ThreadState::Done,
            history: Vec::new(),
            suspension: None,
            last_resume: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }

    /// Whether the thread is waiting for a human.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state == ThreadState::AwaitingApproval
    }

    /// Ids of calls waiting for a human.
    #[must_use]
    pub fn open_calls(&self) -> Vec<CallId> {
        self.suspension
            .as_ref()
            .map(Suspension::awaiting)
            .unwrap_or_default()
    }

    /// Tool calls requested in history that have no terminal result and are
    /// not part of the open suspension, in request order.
    #[must_use]
    pub fn orphaned_calls(&self) -> Vec<ToolCallRef> {
        let settled: HashSet<&CallId> = self
            .history
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::ToolResult { call_id, .. } => Some(call_id),
                HistoryEntry::User { .. } | HistoryEntry::Assistant { .. } => None,
            })
            .collect();
        let suspended: HashSet<CallId> = self.open_calls().into_iter().collect();

        self.history
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Assistant { tool_calls, .. } => Some(tool_calls),
                HistoryEntry::User { .. } | HistoryEntry::ToolResult { .. } => None,
            })
            .flatten()
            .filter(|c| !settled.contains(&c.call_id) && !suspended.contains(&c.call_id))
            .cloned()
            .collect()
    }
}
