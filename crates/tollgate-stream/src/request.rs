//! Inbound request shapes handed over by the transport layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tollgate_core::{ApprovalScope, CallId, Principal, ThreadId};
use tollgate_runtime::HumanDecision;

/// Status reported by [`StopAck`].
pub const STOP_STATUS: &str = "cancellation_requested";

/// A new user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTurn {
    /// The message.
    pub message: String,
    /// Thread to continue. A new thread is created when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    /// Authenticated user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl StartTurn {
    /// A message on a new thread.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thread_id: None,
            user_id: None,
        }
    }

    /// Continue `thread_id`.
    #[must_use]
    pub fn on_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Run on behalf of `user_id`.
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A human's answer to an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApprovalResponse {
    /// Answers for a batch request, keyed by call id.
    Batch {
        /// Thread.
        thread_id: ThreadId,
        /// Authenticated user, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// One answer per call.
        decisions: HashMap<CallId, HumanDecision>,
    },
    /// The answer for a single request.
    Single {
        /// Thread.
        thread_id: ThreadId,
        /// Authenticated user, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Call.
        call_id: CallId,
        /// Whether the call may run.
        approved: bool,
        /// How long to remember the answer.
        #[serde(default = "once")]
        scope: ApprovalScope,
    },
}

fn once() -> ApprovalScope {
    ApprovalScope::Once
}

impl ApprovalResponse {
    /// Answer a single request.
    #[must_use]
    pub fn single(thread_id: ThreadId, call_id: CallId, decision: HumanDecision) -> Self {
        Self::Single {
            thread_id,
            user_id: None,
            call_id,
            approved: decision.approved,
            scope: decision.scope,
        }
    }

    /// Answer a batch request.
    #[must_use]
    pub fn batch(thread_id: ThreadId, decisions: HashMap<CallId, HumanDecision>) -> Self {
        Self::Batch {
            thread_id,
            user_id: None,
            decisions,
        }
    }

    /// Answer on behalf of `user_id`.
    #[must_use]
    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        match &mut self {
            Self::Batch { user_id, .. } | Self::Single { user_id, .. } => *user_id = Some(user.into()),
        }
        self
    }

    /// Thread the answer resumes.
    #[must_use]
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            Self::Batch { thread_id, .. } | Self::Single { thread_id, .. } => thread_id,
        }
    }

    /// Who is answering.
    #[must_use]
    pub fn principal(&self) -> Principal {
        let user = match self {
            Self::Batch { user_id, .. } | Self::Single { user_id, .. } => user_id.as_deref(),
        };
        principal(self.thread_id().clone(), user)
    }

    /// The answers keyed by call id.
    #[must_use]
    pub fn decisions(&self) -> HashMap<CallId, HumanDecision> {
        match self {
            Self::Batch { decisions, .. } => decisions.clone(),
            Self::Single {
                call_id,
                approved,
                scope,
                ..
            } => HashMap::from([(
                call_id.clone(),
                HumanDecision {
                    approved: *approved,
                    scope: *scope,
                },
            )]),
        }
    }
}

/// Ask a thread's running turn to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    /// Thread.
    pub thread_id: ThreadId,
}

/// Reply to a [`StopRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    /// Always [`STOP_STATUS`].
    pub status: String,
    /// Thread.
    pub thread_id: ThreadId,
    /// Human-readable note.
    pub message: String,
}

pub(crate) fn principal(thread_id: ThreadId, user_id: Option<&str>) -> Principal {
    match user_id {
        Some(user) => Principal::user(thread_id, user),
        None => Principal::anonymous(thread_id),
    }
}
