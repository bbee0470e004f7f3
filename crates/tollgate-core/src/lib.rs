//! Tollgate Core - shared value types for the approval control plane.
//!
//! Every other tollgate crate speaks in terms of these types:
//!
//! - Identifiers: [`ThreadId`], [`MessageId`], [`CallId`], [`SuspensionId`]
//! - Time: [`Timestamp`]
//! - Policy vocabulary: [`RiskLevel`], [`ApprovalScope`]
//! - The unit of work being gated: [`PendingToolInvocation`] and its derived
//!   [`Operation`], evaluated on behalf of a [`Principal`]
//!
//! # Example
//!
//! ```
//! use tollgate_core::{CallId, MessageId, Operation, PendingToolInvocation};
//! use serde_json::json;
//!
//! let call = PendingToolInvocation::new(
//!     "obp_requests",
//!     CallId::from("call_1"),
//!     json!({"method": "post", "path": "/banks/gh.29.uk/accounts"}),
//!     MessageId::new(),
//! );
//! assert_eq!(call.operation, Operation::new("POST", "/banks/gh.29.uk/accounts"));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod invocation;
pub mod types;

pub use invocation::{Operation, PendingToolInvocation, Principal};
pub use types::{
    ApprovalScope, CallId, MessageId, ParseScopeError, RiskLevel, SuspensionId, ThreadId,
    Timestamp,
};
