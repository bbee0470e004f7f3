//! Execution engine seam.
//!
//! The reasoning engine that calls the language model and executes tools
//! lives outside this crate. It is driven through [`ExecutionEngine`] and
//! must consult the turn's [`ToolGate`] before executing any tool call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use tollgate_core::{PendingToolInvocation, Principal, ThreadId};

use crate::coordinator::{Coordinator, ResumeOutcome, TurnVerdict};
use crate::error::{CoordinatorResult, EngineResult};
use crate::thread::HistoryEntry;
use crate::trace::TraceEvent;

/// Raw trace produced by one engine run.
pub type TraceStream = BoxStream<'static, EngineResult<TraceEvent>>;

/// What the engine should do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Answer a new user message.
    StartTurn {
        /// The message.
        message: String,
    },
    /// Continue a suspended turn with its settled calls.
    Resume {
        /// The applied resume.
        outcome: ResumeOutcome,
    },
}

/// Gate the engine consults before executing tool calls.
///
/// On [`TurnVerdict::Suspended`] the engine executes nothing, yields a
/// [`TraceKind::Interrupt`](crate::TraceKind::Interrupt) event carrying the
/// signal and ends its stream.
#[async_trait]
pub trait ToolGate: Send + Sync {
    /// Review every tool call requested in one model step.
    async fn review(&self, calls: Vec<PendingToolInvocation>) -> CoordinatorResult<TurnVerdict>;
}

/// Per-turn handles given to the engine.
#[derive(Clone)]
pub struct TurnContext {
    /// Thread the turn belongs to.
    pub thread_id: ThreadId,
    /// Who the turn runs for.
    pub principal: Principal,
    /// Fires when the turn should stop at its next checkpoint.
    pub cancel: CancellationToken,
    /// Approval gate for tool calls.
    pub gate: Arc<dyn ToolGate>,
    /// History before this turn's engine output.
    pub history: Vec<HistoryEntry>,
}

impl TurnContext {
    /// Whether the turn has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnContext")
            .field("thread_id", &self.thread_id)
            .field("principal", &self.principal)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// The reasoning/execution engine.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start a run and return its trace.
    ///
    /// The engine checks `context.cancel` before each sequential tool call
    /// and ends its stream early once it fires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Startup`](crate::EngineError::Startup) if the
    /// run cannot begin.
    async fn run(&self, request: EngineRequest, context: TurnContext) -> EngineResult<TraceStream>;
}

/// [`ToolGate`] backed by the [`Coordinator`] for one principal.
#[derive(Debug, Clone)]
pub struct CoordinatorGate {
    coordinator: Arc<Coordinator>,
    principal: Principal,
}

impl CoordinatorGate {
    /// Gate calls made on behalf of `principal`.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, principal: Principal) -> Self {
        Self {
            coordinator,
            principal,
        }
    }
}

#[async_trait]
impl ToolGate for CoordinatorGate {
    async fn review(&self, calls: Vec<PendingToolInvocation>) -> CoordinatorResult<TurnVerdict> {
        self.coordinator.evaluate_turn(&self.principal, calls).await
    }
}
