//! Human-facing disclosure for a call that needs approval.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tollgate_core::{ApprovalScope, CallId, PendingToolInvocation, RiskLevel, Timestamp};

use crate::catalog::ToolPolicy;

/// How often this thread has already approved the same operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarHistory {
    /// Prior approvals of the same tool and operation in this thread.
    pub count: u32,
    /// When the most recent one happened.
    pub last_approval: Option<Timestamp>,
}

/// Everything a human needs to decide on one call.
///
/// Built once per ask-human decision and sent verbatim in the
/// approval-request event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalContext {
    /// Tool being invoked.
    pub tool_name: String,
    /// Engine-assigned call id.
    pub tool_call_id: CallId,
    /// Raw arguments.
    pub tool_input: Value,
    /// One-line summary, e.g. `POST request to /banks/x/accounts`.
    pub operation_summary: String,
    /// Prompt shown to the human.
    pub message: String,
    /// Assessed risk.
    pub risk_level: RiskLevel,
    /// Resources the call touches.
    pub affected_resources: Vec<String>,
    /// Whether the effect can be undone.
    pub reversible: bool,
    /// Free-text impact estimate.
    pub estimated_impact: String,
    /// Prior approvals of the same operation in this thread.
    pub similar_operations_count: u32,
    /// When the last of those happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_similar_approval: Option<Timestamp>,
    /// Scopes the human may choose.
    pub offered_scopes: Vec<ApprovalScope>,
    /// Pre-selected scope.
    pub suggested_scope: ApprovalScope,
    /// When the context was built.
    pub created_at: Timestamp,
}

impl ApprovalContext {
    /// Compose the context for `call` under `policy`.
    ///
    /// The suggested scope is ONCE for critical operations and SESSION
    /// otherwise, narrowed to an offered scope if needed.
    #[must_use]
    pub fn build(policy: &ToolPolicy, call: &PendingToolInvocation, history: SimilarHistory) -> Self {
        let operation = &call.operation;
        let risk_level = policy.assess_risk(operation);
        let summary = policy.summarize(operation);
        let disclosure = policy.disclose(call);

        let preferred = if risk_level == RiskLevel::Critical {
            ApprovalScope::Once
        } else {
            ApprovalScope::Session
        };
        let offered_scopes = policy.offered_scopes().to_vec();
        let suggested_scope = if offered_scopes.contains(&preferred) {
            preferred
        } else {
            offered_scopes.first().copied().unwrap_or(ApprovalScope::Once)
        };

        let affected_resources = disclosure.affected_resources.unwrap_or_else(|| {
            if operation.path.is_empty() {
                Vec::new()
            } else {
                vec![operation.path.clone()]
            }
        });
        let reversible = disclosure
            .reversible
            .unwrap_or_else(|| risk_level.is_reversible() && operation.method != "DELETE");
        let estimated_impact = disclosure
            .estimated_impact
            .unwrap_or_else(|| default_impact(risk_level, &summary));

        Self {
            tool_name: call.tool.clone(),
            tool_call_id: call.call_id.clone(),
            tool_input: call.arguments.clone(),
            message: disclosure
                .message
                .unwrap_or_else(|| format!("Approve {summary}?")),
            operation_summary: summary,
            risk_level,
            affected_resources,
            reversible,
            estimated_impact,
            similar_operations_count: history.count,
            last_similar_approval: history.last_approval,
            offered_scopes,
            suggested_scope,
            created_at: Timestamp::now(),
        }
    }
}

fn default_impact(risk: RiskLevel, summary: &str) -> String {
    match risk {
        RiskLevel::Safe => format!("{summary} reads data only"),
        RiskLevel::Moderate => format!("{summary} has limited side effects"),
        RiskLevel::Dangerous => format!("{summary} changes remote state"),
        RiskLevel::Critical => format!("{summary} may permanently remove data"),
    }
}
