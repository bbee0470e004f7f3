//! Convenience re-exports for downstream crates.
//!
//! ```
//! use tollgate_core::prelude::*;
//! ```

pub use crate::invocation::{Operation, PendingToolInvocation, Principal};
pub use crate::types::{
    ApprovalScope, CallId, MessageId, RiskLevel, SuspensionId, ThreadId, Timestamp,
};
