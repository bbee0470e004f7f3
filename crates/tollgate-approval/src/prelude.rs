//! Convenience re-exports for downstream crates.
//!
//! ```
//! use tollgate_approval::prelude::*;
//! ```

pub use crate::catalog::{Disclosure, DisclosureBuilder, ToolCatalog, ToolPolicy};
pub use crate::context::ApprovalContext;
pub use crate::engine::{ApprovalSource, Decision, DecisionEngine};
pub use crate::error::{ApprovalError, ApprovalResult};
pub use crate::record::RecordTtls;
pub use crate::rule::{ApprovalPredicate, ApprovalRule, RuleAction};
