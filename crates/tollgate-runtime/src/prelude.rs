//! Convenience re-exports for downstream crates.
//!
//! ```
//! use tollgate_runtime::prelude::*;
//! ```

pub use crate::cancellation::CancellationRegistry;
pub use crate::coordinator::{Coordinator, HumanDecision, SuspendSignal, TurnVerdict};
pub use crate::engine::{EngineRequest, ExecutionEngine, ToolGate, TraceStream, TurnContext};
pub use crate::error::{CoordinatorError, CoordinatorResult, EngineError, EngineResult};
pub use crate::thread::{ExecutionThread, ThreadState};
pub use crate::trace::{TraceEvent, TraceKind};
