//! Suspend/resume coordinator.
//!
//! The [`Coordinator`] owns the thread state machine:
//!
//! ```text
//! Done ──start_turn──▶ Running ──evaluate_turn(ask)──▶ AwaitingApproval
//!  ▲                     │  ▲                               │
//!  └────finish_turn──────┘  └────────────resume─────────────┘
//! ```
//!
//! A suspended turn holds no lock and no connection, only the durable
//! [`Suspension`] saved in the thread, so the resume may arrive on any later
//! connection. Every mutation of a thread happens under a per-thread async
//! mutex; at most one resume per thread is applied at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use tollgate_approval::{ApprovalContext, Decision, DecisionEngine};
use tollgate_core::{
    ApprovalScope, CallId, PendingToolInvocation, Principal, SuspensionId, ThreadId, Timestamp,
};

use crate::call::{CallOutcome, ResolvedBy, ResolvedCall, TrackedCall};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::store::ThreadStore;
use crate::thread::{
    ExecutionThread, HistoryEntry, ResumeRecord, Suspension, ThreadState, ToolCallRef,
};

/// Denial reason for calls a human rejected.
pub const REJECTED_REASON: &str = "rejected by user";
/// Denial reason for calls missing from a resume.
pub const MISSING_DECISION_REASON: &str = "no decision supplied";
/// Denial reason for calls answered after the deadline.
pub const TIMEOUT_REASON: &str = "approval wait timed out";
/// Result recorded for calls that never finished.
pub const CANCELLED_REASON: &str = "cancelled";

/// A human's answer for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    /// Whether the call may run.
    pub approved: bool,
    /// How long the answer should be remembered.
    #[serde(default = "default_scope")]
    pub scope: ApprovalScope,
}

fn default_scope() -> ApprovalScope {
    ApprovalScope::Once
}

impl HumanDecision {
    /// Approve with the given scope.
    #[must_use]
    pub fn approve(scope: ApprovalScope) -> Self {
        Self {
            approved: true,
            scope,
        }
    }

    /// Reject once.
    #[must_use]
    pub fn reject() -> Self {
        Self {
            approved: false,
            scope: ApprovalScope::Once,
        }
    }
}

/// Emitted when a turn suspends: what the human must decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendSignal {
    /// The suspension.
    pub suspension_id: SuspensionId,
    /// The thread.
    pub thread_id: ThreadId,
    /// One context per call awaiting a human.
    pub requests: Vec<ApprovalContext>,
    /// Calls of the same turn already settled by policy.
    #[serde(default)]
    pub resolved: Vec<ResolvedCall>,
    /// Answers after this are treated as denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

impl SuspendSignal {
    /// Whether more than one call awaits a human.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.requests.len() > 1
    }
}

/// Outcome of reviewing one turn's tool calls.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnVerdict {
    /// Every call was settled by policy.
    Proceed {
        /// The settled calls, in request order.
        resolved: Vec<ResolvedCall>,
    },
    /// At least one call needs a human; nothing may execute yet.
    Suspended(SuspendSignal),
}

/// Result of applying a resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeOutcome {
    /// The thread.
    pub thread_id: ThreadId,
    /// The suspension that was closed.
    pub suspension_id: SuspensionId,
    /// Every call of the suspended turn, settled, in request order.
    pub resolved: Vec<ResolvedCall>,
    /// Whether the answer arrived after the deadline.
    pub timed_out: bool,
    /// Whether this is a cached copy of an earlier resume.
    #[serde(default)]
    pub replayed: bool,
}

/// Result of [`Coordinator::start_turn`].
#[derive(Debug, Clone)]
pub struct TurnStart {
    /// The thread after the user message was appended.
    pub thread: ExecutionThread,
    /// Orphaned calls that were given a synthetic "cancelled" result.
    pub repaired: Vec<ToolCallRef>,
    /// Suspension abandoned by this turn, if any.
    pub abandoned: Option<SuspensionId>,
}

struct ResumeSlot<'a> {
    slots: &'a DashMap<ThreadId, ()>,
    thread_id: ThreadId,
}

impl Drop for ResumeSlot<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.thread_id);
    }
}

/// Coordinates approval decisions, suspensions and resumes for all threads.
pub struct Coordinator {
    engine: DecisionEngine,
    threads: Arc<dyn ThreadStore>,
    locks: DashMap<ThreadId, Arc<Mutex<()>>>,
    resuming: DashMap<ThreadId, ()>,
    wait_timeout: Option<Duration>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.engine)
            .field("locked_threads", &self.locks.len())
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator with no approval wait deadline.
    #[must_use]
    pub fn new(engine: DecisionEngine, threads: Arc<dyn ThreadStore>) -> Self {
        Self {
            engine,
            threads,
            locks: DashMap::new(),
            resuming: DashMap::new(),
            wait_timeout: None,
        }
    }

    /// Set how long a suspension waits for a human. `None` waits forever.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// How long a suspension waits for a human. `None` waits forever.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    /// The decision engine.
    #[must_use]
    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.engine
    }

    async fn lock(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(self.locks.entry(thread_id.clone()).or_default().value());
        mutex.lock_owned().await
    }

    async fn load_or_new(&self, thread_id: &ThreadId) -> CoordinatorResult<ExecutionThread> {
        Ok(self
            .threads
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ExecutionThread::new(thread_id.clone())))
    }

    /// Snapshot of a thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store fails.
    pub async fn thread(&self, thread_id: &ThreadId) -> CoordinatorResult<Option<ExecutionThread>> {
        self.threads.load(thread_id).await
    }

    /// Begin a new turn.
    ///
    /// Abandons any open suspension, repairs orphaned tool calls with a
    /// "cancelled" result, appends the user message and marks the thread
    /// `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store fails.
    pub async fn start_turn(&self, thread_id: &ThreadId, message: &str) -> CoordinatorResult<TurnStart> {
        let _guard = self.lock(thread_id).await;
        let mut thread = self.load_or_new(thread_id).await?;

        let abandoned = Self::abandon_suspension(&mut thread);
        let repaired = thread.orphaned_calls();
        for call in &repaired {
            thread
                .history
                .push(HistoryEntry::cancelled_result(call, CANCELLED_REASON));
        }
        if !repaired.is_empty() {
            tracing::info!(thread_id = %thread_id, repaired = repaired.len(), "repaired orphaned tool calls");
        }

        thread.history.push(HistoryEntry::user(message));
        thread.state = ThreadState::Running;
        thread.touch();
        self.threads.save(&thread).await?;

        Ok(TurnStart {
            thread,
            repaired,
            abandoned,
        })
    }

    /// Review one turn's tool calls.
    ///
    /// Each call is checked independently. Calls the engine settles are
    /// finalized; if any call needs a human, the thread suspends and a single
    /// [`SuspendSignal`] lists exactly those calls.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::AlreadySuspended`] if the thread is
    /// already waiting, and [`CoordinatorError::Store`] if the store fails.
    pub async fn evaluate_turn(
        &self,
        principal: &Principal,
        calls: Vec<PendingToolInvocation>,
    ) -> CoordinatorResult<TurnVerdict> {
        let thread_id = &principal.thread_id;
        let _guard = self.lock(thread_id).await;
        let mut thread = self.load_or_new(thread_id).await?;
        if thread.is_suspended() {
            return Err(CoordinatorError::AlreadySuspended {
                thread_id: thread_id.to_string(),
            });
        }

        let mut tracked = Vec::with_capacity(calls.len());
        let mut contexts = Vec::new();
        for call in calls {
            let mut entry = TrackedCall::new(call);
            let decision = self.engine.check_call(&entry.call, principal).await;
            match decision {
                Decision::Approved { .. } => entry.auto_resolve(CallOutcome::Approved)?,
                Decision::Denied { reason } => entry.auto_resolve(CallOutcome::Denied { reason })?,
                Decision::RequiresApproval => {
                    entry.await_human()?;
                    contexts.push(self.engine.build_context(&entry.call, principal).await);
                },
            }
            tracing::debug!(
                thread_id = %thread_id,
                call_id = %entry.call.call_id,
                tool = %entry.call.tool,
                operation = %entry.call.operation,
                state = ?entry.state,
                "tool call reviewed"
            );
            tracked.push(entry);
        }

        let resolved: Vec<ResolvedCall> = tracked.iter().filter_map(TrackedCall::resolved).collect();
        if contexts.is_empty() {
            return Ok(TurnVerdict::Proceed { resolved });
        }

        let suspension = Suspension {
            id: SuspensionId::new(),
            calls: tracked,
            contexts: contexts.clone(),
            created_at: Timestamp::now(),
            deadline: self.wait_timeout.map(|t| Timestamp::now().plus(t)),
        };
        let signal = SuspendSignal {
            suspension_id: suspension.id,
            thread_id: thread_id.clone(),
            requests: contexts,
            resolved,
            deadline: suspension.deadline,
        };

        thread.state = ThreadState::AwaitingApproval;
        thread.suspension = Some(suspension);
        thread.touch();
        self.threads.save(&thread).await?;

        tracing::info!(
            thread_id = %thread_id,
            suspension_id = %signal.suspension_id,
            awaiting = signal.requests.len(),
            "turn suspended for approval"
        );
        Ok(TurnVerdict::Suspended(signal))
    }

    /// Apply a human's answers to the thread's open suspension.
    ///
    /// Calls without an answer are denied. Answers arriving after the
    /// deadline deny every awaiting call. Approvals and rejections with a
    /// persistent scope are recorded. Replaying a resume that was already
    /// applied returns the cached outcome with `replayed` set.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::ResumeInFlight`] if another resume for the thread is being applied
    /// - [`CoordinatorError::NotSuspended`] if there is nothing to resume or replay
    /// - [`CoordinatorError::UnknownCall`] if an answer names a call that is not awaiting
    /// - [`CoordinatorError::Store`] if the store fails
    pub async fn resume(
        &self,
        principal: &Principal,
        decisions: &HashMap<CallId, HumanDecision>,
    ) -> CoordinatorResult<ResumeOutcome> {
        let thread_id = &principal.thread_id;
        let _slot = self.claim_resume(thread_id)?;
        let _guard = self.lock(thread_id).await;

        let mut thread = self
            .threads
            .load(thread_id)
            .await?
            .ok_or_else(|| CoordinatorError::NotSuspended {
                thread_id: thread_id.to_string(),
            })?;

        let Some(mut suspension) = thread.suspension.take() else {
            return Self::replay(&thread, decisions);
        };

        let awaiting = suspension.awaiting();
        if let Some(unknown) = decisions.keys().find(|id| !awaiting.contains(*id)) {
            return Err(CoordinatorError::UnknownCall {
                call_id: unknown.to_string(),
            });
        }

        let timed_out = suspension.is_overdue();
        if timed_out {
            tracing::warn!(thread_id = %thread_id, suspension_id = %suspension.id, "approval answer arrived after deadline");
        }

        let mut scopes = HashMap::new();
        for idx in 0..suspension.calls.len() {
            if !suspension.calls[idx].is_awaiting() {
                continue;
            }
            let tracked = &mut suspension.calls[idx];
            let call_id = tracked.call.call_id.clone();
            if timed_out {
                tracked.resolve(CallOutcome::denied(TIMEOUT_REASON), ResolvedBy::Timeout)?;
                continue;
            }
            let Some(decision) = decisions.get(&call_id) else {
                tracked.resolve(CallOutcome::denied(MISSING_DECISION_REASON), ResolvedBy::Default)?;
                continue;
            };

            let outcome = if decision.approved {
                CallOutcome::Approved
            } else {
                CallOutcome::denied(REJECTED_REASON)
            };
            tracked.resolve(outcome, ResolvedBy::Human)?;
            let scope = suspension.granted_scope(&call_id, decision.scope);
            if scope != decision.scope {
                tracing::warn!(
                    thread_id = %thread_id,
                    call_id = %call_id,
                    requested = %decision.scope,
                    "answer named a scope that was not offered, narrowing to once"
                );
            }
            scopes.insert(call_id.clone(), scope);

            let tracked = &suspension.calls[idx];
            if let Err(e) = self
                .engine
                .record(
                    &tracked.call.tool,
                    &tracked.call.operation,
                    scope,
                    decision.approved,
                    principal,
                )
                .await
            {
                tracing::warn!(thread_id = %thread_id, call_id = %call_id, error = %e, "failed to persist approval decision");
            }
        }

        let resolved = suspension
            .calls
            .iter()
            .filter_map(TrackedCall::resolved)
            .map(|mut r| {
                r.scope = scopes.get(&r.call.call_id).copied();
                r
            })
            .collect();
        let outcome = ResumeOutcome {
            thread_id: thread_id.clone(),
            suspension_id: suspension.id,
            resolved,
            timed_out,
            replayed: false,
        };

        thread.state = ThreadState::Running;
        thread.last_resume = Some(ResumeRecord {
            suspension_id: suspension.id,
            outcome: outcome.clone(),
            applied_at: Timestamp::now(),
        });
        thread.touch();
        self.threads.save(&thread).await?;

        tracing::info!(
            thread_id = %thread_id,
            suspension_id = %suspension.id,
            approved = outcome.resolved.iter().filter(|r| r.is_approved()).count(),
            timed_out,
            "turn resumed"
        );
        Ok(outcome)
    }

    fn replay(
        thread: &ExecutionThread,
        decisions: &HashMap<CallId, HumanDecision>,
    ) -> CoordinatorResult<ResumeOutcome> {
        if let Some(last) = &thread.last_resume
            && decisions
                .keys()
                .all(|id| last.outcome.resolved.iter().any(|r| &r.call.call_id == id))
        {
            tracing::debug!(thread_id = %thread.id, suspension_id = %last.suspension_id, "replaying applied resume");
            let mut outcome = last.outcome.clone();
            outcome.replayed = true;
            return Ok(outcome);
        }
        Err(CoordinatorError::NotSuspended {
            thread_id: thread.id.to_string(),
        })
    }

    fn claim_resume(&self, thread_id: &ThreadId) -> CoordinatorResult<ResumeSlot<'_>> {
        match self.resuming.entry(thread_id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::ResumeInFlight {
                thread_id: thread_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ResumeSlot {
                    slots: &self.resuming,
                    thread_id: thread_id.clone(),
                })
            },
        }
    }

    /// Close the thread's open suspension without applying answers.
    ///
    /// Awaiting calls are denied as cancelled and the thread becomes `Done`.
    /// Returns the closed suspension's id.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store fails.
    pub async fn abandon(&self, thread_id: &ThreadId) -> CoordinatorResult<Option<SuspensionId>> {
        let _guard = self.lock(thread_id).await;
        let Some(mut thread) = self.threads.load(thread_id).await? else {
            return Ok(None);
        };
        let abandoned = Self::abandon_suspension(&mut thread);
        if abandoned.is_some() {
            thread.state = ThreadState::Done;
            thread.touch();
            self.threads.save(&thread).await?;
        }
        Ok(abandoned)
    }

    fn abandon_suspension(thread: &mut ExecutionThread) -> Option<SuspensionId> {
        let mut suspension = thread.suspension.take()?;
        for tracked in suspension.calls.iter_mut().filter(|c| c.is_awaiting()) {
            if let Err(e) = tracked.resolve(CallOutcome::denied(CANCELLED_REASON), ResolvedBy::Abandoned) {
                tracing::warn!(error = %e, "could not close abandoned call");
            }
        }
        tracing::info!(
            thread_id = %thread.id,
            suspension_id = %suspension.id,
            calls = suspension.calls.len(),
            "suspension abandoned"
        );
        Some(suspension.id)
    }

    /// Append entries to the thread's history.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store fails.
    pub async fn append_history(&self, thread_id: &ThreadId, entries: Vec<HistoryEntry>) -> CoordinatorResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.lock(thread_id).await;
        let mut thread = self.load_or_new(thread_id).await?;
        thread.history.extend(entries);
        thread.touch();
        self.threads.save(&thread).await
    }

    /// Mark a running turn finished. A suspended thread stays suspended.
    ///
    /// Returns the thread's resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store fails.
    pub async fn finish_turn(&self, thread_id: &ThreadId) -> CoordinatorResult<ThreadState> {
        let _guard = self.lock(thread_id).await;
        let mut thread = self.load_or_new(thread_id).await?;
        if thread.state == ThreadState::Running {
            thread.state = ThreadState::Done;
            thread.touch();
            self.threads.save(&thread).await?;
        }
        Ok(thread.state)
    }

    /// Drop per-thread locks nobody holds.
    pub fn prune_locks(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
