//! Tollgate Runtime - suspend/resume coordination and cooperative cancellation.
//!
//! - [`Coordinator`]: per-turn review of tool calls, suspension for human
//!   approval and idempotent resume, on top of the
//!   [`DecisionEngine`](tollgate_approval::DecisionEngine)
//! - [`TrackedCall`]: the per-call `PendingCheck -> AutoResolved | AwaitingHuman -> Resolved`
//!   state machine
//! - [`ExecutionThread`] / [`ThreadStore`]: durable per-conversation state
//! - [`CancellationRegistry`]: per-thread stop flags and turn tokens
//! - [`ExecutionEngine`] / [`ToolGate`]: the seam to the external reasoning engine
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use serde_json::json;
//! use tollgate_approval::{DecisionEngine, RecordTtls, ToolCatalog, ToolPolicy};
//! use tollgate_core::{ApprovalScope, CallId, MessageId, PendingToolInvocation, Principal, ThreadId};
//! use tollgate_runtime::{Coordinator, HumanDecision, KvThreadStore, TurnVerdict};
//! use tollgate_storage::MemoryKvStore;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let kv = Arc::new(MemoryKvStore::new());
//! let engine = DecisionEngine::new(
//!     ToolCatalog::new().with_tool(ToolPolicy::new("obp_requests")),
//!     kv.clone(),
//!     RecordTtls::default(),
//! );
//! let coordinator = Coordinator::new(engine, Arc::new(KvThreadStore::new(kv).unwrap()));
//! let principal = Principal::anonymous(ThreadId::from("thread-1"));
//!
//! let call = PendingToolInvocation::new(
//!     "obp_requests",
//!     CallId::from("call_1"),
//!     json!({"method": "POST", "path": "/banks/gh.29.uk/accounts"}),
//!     MessageId::new(),
//! );
//! let TurnVerdict::Suspended(signal) = coordinator.evaluate_turn(&principal, vec![call]).await.unwrap() else {
//!     unreachable!()
//! };
//! assert_eq!(signal.requests.len(), 1);
//!
//! let answers = HashMap::from([(CallId::from("call_1"), HumanDecision::approve(ApprovalScope::Session))]);
//! let outcome = coordinator.resume(&principal, &answers).await.unwrap();
//! assert!(outcome.resolved[0].is_approved());
//! # });
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod call;
pub mod cancellation;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod store;
pub mod thread;
pub mod trace;

pub use call::{CallOutcome, CallState, ResolvedBy, ResolvedCall, TrackedCall};
pub use cancellation::{CancellationFlag, CancellationRegistry, CancellationStats};
pub use coordinator::{
    Coordinator, HumanDecision, ResumeOutcome, SuspendSignal, TurnStart, TurnVerdict,
};
pub use engine::{
    CoordinatorGate, EngineRequest, ExecutionEngine, ToolGate, TraceStream, TurnContext,
};
pub use error::{CoordinatorError, CoordinatorResult, EngineError, EngineResult};
pub use store::{KvThreadStore, ThreadStore};
pub use thread::{
    ExecutionThread, HistoryEntry, ResumeRecord, Suspension, ThreadState, ToolCallRef,
};
pub use trace::{ToolStatus, TraceEvent, TraceKind};

pub use tokio_util::sync::CancellationToken;
