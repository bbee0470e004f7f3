//! Tollgate Approval - the approval decision engine.
//!
//! Decides, for every tool call an agent wants to make, whether it may run
//! automatically, must be refused, or must wait for a human.
//!
//! - [`ApprovalRule`]: ordered method/path glob rules and runtime
//!   [`ApprovalPredicate`]s, first match wins
//! - [`ToolCatalog`] / [`ToolPolicy`]: per-tool default risk, rules, offered
//!   scopes and disclosure hooks
//! - [`RecordStore`]: persisted decisions in SESSION, USER and WORKSPACE
//!   tiers over a [`tollgate_storage::KvStore`]
//! - [`DecisionEngine`]: the tiered check, recording and revocation
//! - [`ApprovalContext`]: what a human sees when asked
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tollgate_approval::{ApprovalRule, DecisionEngine, RecordTtls, RuleAction, ToolCatalog, ToolPolicy};
//! use tollgate_core::{ApprovalScope, Operation, Principal, ThreadId};
//! use tollgate_storage::MemoryKvStore;
//!
//! # tokio_test_block(async {
//! let catalog = ToolCatalog::new().with_tool(
//!     ToolPolicy::new("obp_requests")
//!         .with_rule(ApprovalRule::pattern("DELETE", "*", RuleAction::AlwaysDeny).unwrap()),
//! );
//! let engine = DecisionEngine::new(catalog, Arc::new(MemoryKvStore::new()), RecordTtls::default());
//! let principal = Principal::anonymous(ThreadId::from("thread-1"));
//!
//! let create = Operation::new("POST", "/banks/gh.29.uk/accounts");
//! assert!(engine.check("obp_requests", &create, &principal).await.requires_approval());
//!
//! engine.record("obp_requests", &create, ApprovalScope::Session, true, &principal).await.unwrap();
//! assert!(engine.check("obp_requests", &create, &principal).await.is_approved());
//!
//! let delete = Operation::new("DELETE", "/banks/gh.29.uk");
//! assert!(engine.check("obp_requests", &delete, &principal).await.is_denied());
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod catalog;
pub mod context;
pub mod engine;
/// Error types and results for the approval module.
pub mod error;
pub mod record;
pub mod rule;

pub use catalog::{Disclosure, DisclosureBuilder, ToolCatalog, ToolPolicy, classify_risk};
pub use context::{ApprovalContext, SimilarHistory};
pub use engine::{ApprovalSource, Decision, DecisionEngine, GrantSummary};
pub use error::{ApprovalError, ApprovalResult};
pub use record::{ApprovalRecord, RecordStore, RecordTtls};
pub use rule::{ApprovalPredicate, ApprovalRule, PatternRule, RuleAction, RuleMatch};
