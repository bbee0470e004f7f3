//! Tool catalog: per-tool approval metadata.
//!
//! Every tool the execution engine may call is registered with a
//! [`ToolPolicy`]: its fallback risk level, its ordered rules, the scopes a
//! human may grant, and optional disclosure hooks. Calls to tools missing
//! from the catalog always require a human.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use tollgate_core::{ApprovalScope, Operation, PendingToolInvocation, RiskLevel};
use tollgate_core::invocation::DEFAULT_METHOD;

use crate::error::{ApprovalError, ApprovalResult};
use crate::rule::{ApprovalRule, RuleMatch, first_match};

/// Extra human-facing detail a tool contributes to its approval prompt.
///
/// Unset fields fall back to the generic values derived from the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disclosure {
    /// Replaces the default `Approve {summary}?` prompt.
    pub message: Option<String>,
    /// Resources the call touches.
    pub affected_resources: Option<Vec<String>>,
    /// Whether the effect can be undone.
    pub reversible: Option<bool>,
    /// Free-text impact estimate.
    pub estimated_impact: Option<String>,
}

/// Builds a [`Disclosure`] for a pending call.
pub trait DisclosureBuilder: Send + Sync {
    /// Describe the call for a human.
    fn describe(&self, call: &PendingToolInvocation) -> Disclosure;
}

impl<F> DisclosureBuilder for F
where
    F: Fn(&PendingToolInvocation) -> Disclosure + Send + Sync,
{
    fn describe(&self, call: &PendingToolInvocation) -> Disclosure {
        self(call)
    }
}

/// Classify an operation's risk from its method.
///
/// Read-only HTTP methods are safe, mutating ones dangerous and `DELETE`
/// critical. Anything else, including non-HTTP tools, gets the tool's
/// default.
#[must_use]
pub fn classify_risk(operation: &Operation, default_risk: RiskLevel) -> RiskLevel {
    match operation.method.as_str() {
        "GET" | "HEAD" | "OPTIONS" => RiskLevel::Safe,
        "POST" | "PUT" | "PATCH" => RiskLevel::Dangerous,
        "DELETE" => RiskLevel::Critical,
        _ => default_risk,
    }
}

/// Approval metadata for one tool.
#[derive(Clone)]
pub struct ToolPolicy {
    name: String,
    default_risk: RiskLevel,
    rules: Vec<ApprovalRule>,
    offered_scopes: Vec<ApprovalScope>,
    summary_template: Option<String>,
    disclosure: Option<Arc<dyn DisclosureBuilder>>,
}

impl ToolPolicy {
    /// A policy with `Dangerous` default risk, no rules, and ONCE+SESSION
    /// offered.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_risk: RiskLevel::Dangerous,
            rules: Vec::new(),
            offered_scopes: vec![ApprovalScope::Once, ApprovalScope::Session],
            summary_template: None,
            disclosure: None,
        }
    }

    /// Set the fallback risk level.
    #[must_use]
    pub fn with_default_risk(mut self, risk: RiskLevel) -> Self {
        self.default_risk = risk;
        self
    }

    /// Append a rule. Rules are evaluated in insertion order.
    #[must_use]
    pub fn with_rule(mut self, rule: ApprovalRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the offered scopes. An empty list keeps the current ones.
    #[must_use]
    pub fn with_offered_scopes(mut self, scopes: Vec<ApprovalScope>) -> Self {
        if !scopes.is_empty() {
            self.offered_scopes = scopes;
        }
        self
    }

    /// Set a summary template; `{method}`, `{path}` and `{tool}` are
    /// substituted.
    #[must_use]
    pub fn with_summary_template(mut self, template: impl Into<String>) -> Self {
        self.summary_template = Some(template.into());
        self
    }

    /// Attach a disclosure builder.
    #[must_use]
    pub fn with_disclosure(mut self, builder: impl DisclosureBuilder + 'static) -> Self {
        self.disclosure = Some(Arc::new(builder));
        self
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fallback risk level.
    #[must_use]
    pub fn default_risk(&self) -> RiskLevel {
        self.default_risk
    }

    /// Ordered rules.
    #[must_use]
    pub fn rules(&self) -> &[ApprovalRule] {
        &self.rules
    }

    /// Scopes a human may choose from.
    #[must_use]
    pub fn offered_scopes(&self) -> &[ApprovalScope] {
        &self.offered_scopes
    }

    /// First rule matching the call, if any.
    #[must_use]
    pub fn match_rule(&self, operation: &Operation, arguments: &Value) -> Option<RuleMatch> {
        first_match(&self.rules, operation, arguments)
    }

    /// Risk of the operation under this tool's heuristic.
    #[must_use]
    pub fn assess_risk(&self, operation: &Operation) -> RiskLevel {
        classify_risk(operation, self.default_risk)
    }

    /// Human-readable summary of the operation.
    #[must_use]
    pub fn summarize(&self, operation: &Operation) -> String {
        if let Some(template) = &self.summary_template {
            return template
                .replace("{method}", &operation.method)
                .replace("{path}", &operation.path)
                .replace("{tool}", &self.name);
        }
        if operation.method == DEFAULT_METHOD && operation.path.is_empty() {
            format!("Execute {}", self.name)
        } else {
            operation.summary()
        }
    }

    /// Tool-specific disclosure for the call, or an empty one.
    #[must_use]
    pub fn disclose(&self, call: &PendingToolInvocation) -> Disclosure {
        self.disclosure
            .as_ref()
            .map(|builder| builder.describe(call))
            .unwrap_or_default()
    }
}

impl fmt::Debug for ToolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolPolicy")
            .field("name", &self.name)
            .field("default_risk", &self.default_risk)
            .field("rules", &self.rules)
            .field("offered_scopes", &self.offered_scopes)
            .field("summary_template", &self.summary_template)
            .field("has_disclosure", &self.disclosure.is_some())
            .finish()
    }
}

/// The set of known tools.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolPolicy>,
}

impl ToolCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tool.
    #[must_use]
    pub fn with_tool(mut self, policy: ToolPolicy) -> Self {
        self.register(policy);
        self
    }

    /// Register (or replace) a tool.
    pub fn register(&mut self, policy: ToolPolicy) {
        if self.tools.contains_key(policy.name()) {
            tracing::warn!(tool = policy.name(), "replacing tool policy");
        }
        self.tools.insert(policy.name.clone(), policy);
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolPolicy> {
        self.tools.get(name)
    }

    /// Look up a tool that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownTool`] if the tool is not registered.
    pub fn require(&self, name: &str) -> ApprovalResult<&ToolPolicy> {
        self.get(name)
            .ok_or_else(|| ApprovalError::UnknownTool(name.to_string()))
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleAction;
    use serde_json::json;
    use tollgate_core::{CallId, MessageId};

    #[test]
    fn test_classify_risk() {
        let risk = |m| classify_risk(&Operation::new(m, "/x"), RiskLevel::Moderate);
        assert_eq!(risk("GET"), RiskLevel::Safe);
        assert_eq!(risk("POST"), RiskLevel::Dangerous);
        assert_eq!(risk("PATCH"), RiskLevel::Dangerous);
        assert_eq!(risk("DELETE"), RiskLevel::Critical);
        assert_eq!(risk("CALL"), RiskLevel::Moderate);
    }

    #[test]
    fn test_summaries() {
        let policy = ToolPolicy::new("obp_requests");
        assert_eq!(
            policy.summarize(&Operation::new("post", "/banks/x/accounts")),
            "POST request to /banks/x/accounts"
        );

        let plain = ToolPolicy::new("search");
        assert_eq!(
            plain.summarize(&Operation::from_arguments(&json!({"q": "x"}))),
            "Execute search"
        );

        let templated = ToolPolicy::new("obp_requests").with_summary_template("{tool}: {method} {path}");
        assert_eq!(
            templated.summarize(&Operation::new("GET", "/banks")),
            "obp_requests: GET /banks"
        );
    }

    #[test]
    fn test_offered_scopes_default_and_override() {
        let policy = ToolPolicy::new("t");
        assert_eq!(policy.offered_scopes(), &[ApprovalScope::Once, ApprovalScope::Session]);
        let policy = policy.with_offered_scopes(vec![]);
        assert_eq!(policy.offered_scopes().len(), 2);
        let policy = policy.with_offered_scopes(vec![ApprovalScope::User]);
        assert_eq!(policy.offered_scopes(), &[ApprovalScope::User]);
    }

    #[test]
    fn test_disclosure_builder() {
        let policy = ToolPolicy::new("obp_requests").with_disclosure(|call: &PendingToolInvocation| Disclosure {
            affected_resources: Some(vec![call.operation.path.clone()]),
            reversible: Some(false),
            ..Disclosure::default()
        });
        let call = PendingToolInvocation::new(
            "obp_requests",
            CallId::from("c1"),
            json!({"method": "DELETE", "path": "/banks/x"}),
            MessageId::new(),
        );
        let disclosure = policy.disclose(&call);
        assert_eq!(disclosure.affected_resources, Some(vec!["/banks/x".to_string()]));
        assert_eq!(disclosure.reversible, Some(false));
        assert!(disclosure.message.is_none());

        assert_eq!(ToolPolicy::new("other").disclose(&call), Disclosure::default());
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ToolCatalog::new().with_tool(
            ToolPolicy::new("obp_requests")
                .with_rule(ApprovalRule::pattern("GET", "*", RuleAction::AutoApprove).unwrap()),
        );
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("obp_requests").is_some());
        assert!(matches!(
            catalog.require("rm_rf"),
            Err(ApprovalError::UnknownTool(name)) if name == "rm_rf"
        ));
    }
}
