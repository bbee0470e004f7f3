//! Approval decision engine.
//!
//! The [`DecisionEngine`] is the single entry point for deciding whether a
//! tool call may run.
//!
//! # Check Flow
//!
//! 1. **Deny rules** (hard boundaries)
//!    - First matching rule is `always_deny` -> DENY, even over stored grants
//! 2. **Stored decisions** (SESSION, then USER, then WORKSPACE)
//!    - First live record wins; USER/WORKSPACE hits are copied into SESSION
//!    - Expired or corrupted records count as absent
//! 3. **Unknown tool** -> ask a human
//! 4. **Rules** (`auto_approve` / `require_approval`)
//! 5. **Risk heuristic** -> dangerous and critical operations ask a human

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use tollgate_core::{
    ApprovalScope, Operation, PendingToolInvocation, Principal, RiskLevel, Timestamp,
};
use tollgate_storage::KvStore;

use crate::catalog::{ToolCatalog, ToolPolicy};
use crate::context::{ApprovalContext, SimilarHistory};
use crate::error::{ApprovalError, ApprovalResult};
use crate::record::{ApprovalRecord, RecordStore, RecordTtls, tier_namespace};
use crate::rule::RuleAction;

/// Why a call was approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalSource {
    /// A stored decision in this tier.
    Record {
        /// Tier the record was found in.
        scope: ApprovalScope,
    },
    /// An `auto_approve` rule.
    Rule,
    /// The risk heuristic judged the operation harmless.
    Risk {
        /// Assessed risk.
        level: RiskLevel,
    },
}

/// Outcome of [`DecisionEngine::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// The call may run.
    Approved {
        /// What approved it.
        source: ApprovalSource,
    },
    /// The call must not run. Terminal.
    Denied {
        /// Human-readable reason.
        reason: String,
    },
    /// A human must decide.
    RequiresApproval,
}

impl Decision {
    /// Whether the call may run.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    /// Whether the call was refused.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Whether a human must decide.
    #[must_use]
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::RequiresApproval)
    }

    /// The policy violation behind a denial, if this is one.
    #[must_use]
    pub fn violation(&self, tool: &str) -> Option<ApprovalError> {
        match self {
            Self::Denied { reason } => Some(ApprovalError::PolicyViolation {
                tool: tool.to_string(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// A stored SESSION decision, as listed by [`DecisionEngine::session_summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSummary {
    /// Tool the decision covers.
    pub tool: String,
    /// Operation the decision covers.
    pub operation: Operation,
    /// The decision.
    pub approved: bool,
    /// Seconds since the decision was made.
    pub age_secs: u64,
}

/// Tiered approve/deny/ask-human decisions for tool calls.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    catalog: Arc<ToolCatalog>,
    records: RecordStore,
}

impl DecisionEngine {
    /// Create an engine over a catalog and a record store.
    #[must_use]
    pub fn new(catalog: ToolCatalog, kv: Arc<dyn KvStore>, ttls: RecordTtls) -> Self {
        Self {
            catalog: Arc::new(catalog),
            records: RecordStore::new(kv, ttls),
        }
    }

    /// The tool catalog.
    #[must_use]
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// The record store.
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Decide on an operation without its raw arguments.
    ///
    /// Custom predicates see `{"method": .., "path": ..}`.
    pub async fn check(&self, tool: &str, operation: &Operation, principal: &Principal) -> Decision {
        let arguments = json!({ "method": operation.method, "path": operation.path });
        self.evaluate(tool, operation, &arguments, principal).await
    }

    /// Decide on a pending call.
    pub async fn check_call(&self, call: &PendingToolInvocation, principal: &Principal) -> Decision {
        self.evaluate(&call.tool, &call.operation, &call.arguments, principal)
            .await
    }

    async fn evaluate(
        &self,
        tool: &str,
        operation: &Operation,
        arguments: &Value,
        principal: &Principal,
    ) -> Decision {
        let policy = self.catalog.get(tool);
        let rule = policy.and_then(|p| p.match_rule(operation, arguments));

        // Step 1: deny rules beat any stored grant
        if let Some(m) = &rule
            && m.action == RuleAction::AlwaysDeny
        {
            tracing::info!(tool, operation = %operation, reason = %m.reason, "call denied by rule");
            return Decision::Denied {
                reason: m.reason.clone(),
            };
        }

        // Step 2: stored decisions
        if let Some(decision) = self.lookup(tool, operation, principal).await {
            return decision;
        }

        // Step 3: unknown tools always ask
        let Some(policy) = policy else {
            tracing::debug!(tool, "tool not in catalog, asking a human");
            return Decision::RequiresApproval;
        };

        // Step 4: rules
        match rule.map(|m| m.action) {
            Some(RuleAction::AutoApprove) => {
                return Decision::Approved {
                    source: ApprovalSource::Rule,
                };
            },
            Some(RuleAction::RequireApproval) => return Decision::RequiresApproval,
            Some(RuleAction::AlwaysDeny) | None => {},
        }

        // Step 5: risk heuristic
        let level = policy.assess_risk(operation);
        if level.requires_approval() {
            Decision::RequiresApproval
        } else {
            Decision::Approved {
                source: ApprovalSource::Risk { level },
            }
        }
    }

    async fn lookup(&self, tool: &str, operation: &Operation, principal: &Principal) -> Option<Decision> {
        for scope in ApprovalScope::LOOKUP_ORDER {
            let Some(namespace) = tier_namespace(scope, principal) else {
                continue;
            };
            let record = match self.records.read(&namespace, tool, operation).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(tool, operation = %operation, %scope, error = %e, "treating unreadable approval record as absent");
                    continue;
                },
            };

            if scope != ApprovalScope::Session {
                self.promote(&record, principal).await;
            }

            tracing::debug!(tool, operation = %operation, %scope, approved = record.approved, "stored decision found");
            return Some(if record.approved {
                Decision::Approved {
                    source: ApprovalSource::Record { scope },
                }
            } else {
                Decision::Denied {
                    reason: format!("previously denied at {scope} scope"),
                }
            });
        }
        None
    }

    /// Copy a USER/WORKSPACE hit into the thread's SESSION tier. The copy
    /// never outlives its source.
    async fn promote(&self, record: &ApprovalRecord, principal: &Principal) {
        let Some(namespace) = tier_namespace(ApprovalScope::Session, principal) else {
            return;
        };
        let lifetime = match (self.records.ttls().session, record.remaining()) {
            (Some(session), Some(left)) => Some(session.min(left)),
            (session, left) => session.or(left),
        };
        if lifetime.is_some_and(|d| d.as_secs() == 0) {
            return;
        }
        let promoted = ApprovalRecord::new(
            record.tool.clone(),
            record.operation.clone(),
            ApprovalScope::Session,
            record.approved,
            lifetime,
        );
        if let Err(e) = self.records.write(&namespace, &promoted).await {
            tracing::warn!(tool = %record.tool, error = %e, "failed to promote approval into session");
        }
    }

    /// Persist a human decision.
    ///
    /// ONCE decisions are not stored. A USER decision for a principal without
    /// a user id is stored at SESSION instead. Returns the tier actually
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn record(
        &self,
        tool: &str,
        operation: &Operation,
        scope: ApprovalScope,
        approved: bool,
        principal: &Principal,
    ) -> ApprovalResult<Option<ApprovalScope>> {
        let scope = match scope {
            ApprovalScope::Once => return Ok(None),
            ApprovalScope::User if principal.user_id.is_none() => {
                tracing::warn!(tool, thread_id = %principal.thread_id, "no user id, storing user-scope decision in session");
                ApprovalScope::Session
            },
            other => other,
        };
        let Some(namespace) = tier_namespace(scope, principal) else {
            return Ok(None);
        };

        let record = ApprovalRecord::new(
            tool,
            operation.clone(),
            scope,
            approved,
            self.records.ttls().for_scope(scope),
        );
        self.records.write(&namespace, &record).await?;
        tracing::info!(tool, operation = %operation, %scope, approved, "approval decision recorded");
        Ok(Some(scope))
    }

    /// Remove the SESSION and USER decisions for one operation.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn revoke(&self, tool: &str, operation: &Operation, principal: &Principal) -> ApprovalResult<bool> {
        let mut removed = false;
        for scope in [ApprovalScope::Session, ApprovalScope::User] {
            if let Some(namespace) = tier_namespace(scope, principal) {
                removed |= self.records.remove(&namespace, tool, operation).await?;
            }
        }
        if removed {
            tracing::info!(tool, operation = %operation, "approval revoked");
        }
        Ok(removed)
    }

    /// Remove every decision in one tier. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn clear(&self, scope: ApprovalScope, principal: &Principal) -> ApprovalResult<u64> {
        match tier_namespace(scope, principal) {
            Some(namespace) => self.records.clear(&namespace).await,
            None => Ok(0),
        }
    }

    /// SESSION decisions for the principal's thread, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn session_summary(&self, principal: &Principal) -> ApprovalResult<Vec<GrantSummary>> {
        let Some(namespace) = tier_namespace(ApprovalScope::Session, principal) else {
            return Ok(Vec::new());
        };
        Ok(self
            .records
            .list(&namespace)
            .await?
            .into_iter()
            .map(|r| GrantSummary {
                age_secs: r.age_secs(),
                tool: r.tool,
                operation: r.operation,
                approved: r.approved,
            })
            .collect())
    }

    /// Compose the human-facing context for a call that needs approval.
    ///
    /// Tools missing from the catalog get the default policy.
    pub async fn build_context(&self, call: &PendingToolInvocation, principal: &Principal) -> ApprovalContext {
        let history = self.similar_history(call, principal).await;
        match self.catalog.get(&call.tool) {
            Some(policy) => ApprovalContext::build(policy, call, history),
            None => ApprovalContext::build(&ToolPolicy::new(call.tool.clone()), call, history),
        }
    }

    async fn similar_history(&self, call: &PendingToolInvocation, principal: &Principal) -> SimilarHistory {
        let Some(namespace) = tier_namespace(ApprovalScope::Session, principal) else {
            return SimilarHistory::default();
        };
        let records = match self.records.list(&namespace).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(tool = %call.tool, error = %e, "could not read session history");
                return SimilarHistory::default();
            },
        };
        let approvals: Vec<Timestamp> = records
            .into_iter()
            .filter(|r| r.approved && r.tool == call.tool && r.operation.method == call.operation.method)
            .map(|r| r.created_at)
            .collect();
        SimilarHistory {
            count: u32::try_from(approvals.len()).unwrap_or(u32::MAX),
            last_approval: approvals.into_iter().max(),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
