//! Per-call approval state machine.
//!
//! ```text
//! PendingCheck ──▶ AutoResolved(outcome)
//!      │
//!      └────────▶ AwaitingHuman ──▶ Resolved(outcome, by)
//! ```
//!
//! `AutoResolved` and `Resolved` are terminal.

use serde::{Deserialize, Serialize};

use tollgate_core::{ApprovalScope, PendingToolInvocation};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Final verdict on a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call may execute.
    Approved,
    /// The call must not execute.
    Denied {
        /// Why.
        reason: String,
    },
}

impl CallOutcome {
    /// Whether the call may execute.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Shorthand for a denial.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }
}

/// Who settled a call awaiting a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    /// The decision engine, without asking.
    Policy,
    /// A human answered.
    Human,
    /// The human's answer omitted the call.
    Default,
    /// The suspension outlived its deadline.
    Timeout,
    /// The suspension was abandoned by a new turn.
    Abandoned,
}

/// Where a call is in its approval lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallState {
    /// Not yet evaluated.
    PendingCheck,
    /// Settled by policy.
    AutoResolved {
        /// The verdict.
        outcome: CallOutcome,
    },
    /// Waiting for a human.
    AwaitingHuman,
    /// Settled after waiting.
    Resolved {
        /// The verdict.
        outcome: CallOutcome,
        /// Who settled it.
        by: ResolvedBy,
    },
}

impl CallState {
    fn name(&self) -> &'static str {
        match self {
            Self::PendingCheck => "pending_check",
            Self::AutoResolved { .. } => "auto_resolved",
            Self::AwaitingHuman => "awaiting_human",
            Self::Resolved { .. } => "resolved",
        }
    }

    /// Whether the call is settled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoResolved { .. } | Self::Resolved { .. })
    }

    /// The verdict, once settled.
    #[must_use]
    pub fn outcome(&self) -> Option<&CallOutcome> {
        match self {
            Self::AutoResolved { outcome } | Self::Resolved { outcome, .. } => Some(outcome),
            Self::PendingCheck | Self::AwaitingHuman => None,
        }
    }
}

/// A call and its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedCall {
    /// The call.
    pub call: PendingToolInvocation,
    /// Its state.
    pub state: CallState,
}

impl TrackedCall {
    /// Start tracking a call in `PendingCheck`.
    #[must_use]
    pub fn new(call: PendingToolInvocation) -> Self {
        Self {
            call,
            state: CallState::PendingCheck,
        }
    }

    fn invalid(&self, to: &'static str) -> CoordinatorError {
        CoordinatorError::InvalidTransition {
            call_id: self.call.call_id.to_string(),
            from: self.state.name(),
            to,
        }
    }

    /// `PendingCheck -> AutoResolved`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidTransition`] from any other state.
    pub fn auto_resolve(&mut self, outcome: CallOutcome) -> CoordinatorResult<()> {
        if self.state != CallState::PendingCheck {
            return Err(self.invalid("auto_resolved"));
        }
        self.state = CallState::AutoResolved { outcome };
        Ok(())
    }

    /// `PendingCheck -> AwaitingHuman`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidTransition`] from any other state.
    pub fn await_human(&mut self) -> CoordinatorResult<()> {
        if self.state != CallState::PendingCheck {
            return Err(self.invalid("awaiting_human"));
        }
        self.state = CallState::AwaitingHuman;
        Ok(())
    }

    /// `AwaitingHuman -> Resolved`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidTransition`] from any other state.
    pub fn resolve(&mut self, outcome: CallOutcome, by: ResolvedBy) -> CoordinatorResult<()> {
        if self.state != CallState::AwaitingHuman {
            return Err(self.invalid("resolved"));
        }
        self.state = CallState::Resolved { outcome, by };
        Ok(())
    }

    /// Whether the call is waiting for a human.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        self.state == CallState::AwaitingHuman
    }

    /// Snapshot of a settled call.
    #[must_use]
    pub fn resolved(&self) -> Option<ResolvedCall> {
        match &self.state {
            CallState::AutoResolved { outcome } => Some(ResolvedCall {
                call: self.call.clone(),
                outcome: outcome.clone(),
                resolved_by: ResolvedBy::Policy,
                scope: None,
            }),
            CallState::Resolved { outcome, by } => Some(ResolvedCall {
                call: self.call.clone(),
                outcome: outcome.clone(),
                resolved_by: *by,
                scope: None,
            }),
            CallState::PendingCheck | CallState::AwaitingHuman => None,
        }
    }
}

/// A settled call handed back to the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCall {
    /// The call.
    pub call: PendingToolInvocation,
    /// The verdict.
    pub outcome: CallOutcome,
    /// Who settled it.
    pub resolved_by: ResolvedBy,
    /// Scope a human granted, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ApprovalScope>,
}

impl ResolvedCall {
    /// Whether the call may execute.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.outcome.is_approved()
    }

    /// Denial reason, if denied.
    #[must_use]
    pub fn denial_reason(&self) -> Option<&str> {
        match &self.outcome {
            CallOutcome::Denied { reason } => Some(reason),
            CallOutcome::Approved => None,
        }
    }
}
