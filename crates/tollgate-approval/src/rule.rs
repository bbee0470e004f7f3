//! Approval rules: static method/path patterns and runtime predicates.
//!
//! Rules are evaluated in order and the first match wins. A
//! [`PatternRule`] matches when both its method glob and its path glob
//! match the operation; a custom [`ApprovalPredicate`] always matches and
//! decides from the raw call arguments.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tollgate_core::Operation;

use crate::error::{ApprovalError, ApprovalResult};

/// What a matching rule decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Proceed without asking.
    AutoApprove,
    /// Ask a human, regardless of the risk heuristic.
    RequireApproval,
    /// Refuse. Terminal.
    AlwaysDeny,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => write!(f, "auto_approve"),
            Self::RequireApproval => write!(f, "require_approval"),
            Self::AlwaysDeny => write!(f, "always_deny"),
        }
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_approve" => Ok(Self::AutoApprove),
            "require_approval" => Ok(Self::RequireApproval),
            "always_deny" => Ok(Self::AlwaysDeny),
            other => Err(format!("unknown rule action '{other}'")),
        }
    }
}

/// Runtime-injected approval logic for one tool.
///
/// Closures of type `Fn(&Value) -> RuleAction` implement this trait.
pub trait ApprovalPredicate: Send + Sync {
    /// Decide from the call's raw arguments.
    fn evaluate(&self, arguments: &Value) -> RuleAction;
}

impl<F> ApprovalPredicate for F
where
    F: Fn(&Value) -> RuleAction + Send + Sync,
{
    fn evaluate(&self, arguments: &Value) -> RuleAction {
        self(arguments)
    }
}

/// A compiled `{method-glob, path-glob} -> action` rule.
#[derive(Clone)]
pub struct PatternRule {
    method: String,
    path: String,
    method_matcher: GlobMatcher,
    path_matcher: GlobMatcher,
    action: RuleAction,
    reason: Option<String>,
}

impl PatternRule {
    /// Compile a rule. The method glob is matched case-insensitively; `*` in
    /// the path glob also matches `/`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidRule`] if either glob is malformed.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        action: RuleAction,
    ) -> ApprovalResult<Self> {
        let method = method.into();
        let path = path.into();
        let method_matcher = compile(&method, true)?;
        let path_matcher = compile(&path, false)?;
        Ok(Self {
            method,
            path,
            method_matcher,
            path_matcher,
            action,
            reason: None,
        })
    }

    /// Attach a human-readable reason, reported on denials.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether the rule covers `operation`.
    #[must_use]
    pub fn matches(&self, operation: &Operation) -> bool {
        self.method_matcher.is_match(&operation.method) && self.path_matcher.is_match(&operation.path)
    }

    /// The rule's action.
    #[must_use]
    pub fn action(&self) -> RuleAction {
        self.action
    }

    /// The configured reason, or a description of the pattern.
    #[must_use]
    pub fn reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("matched rule {} {} -> {}", self.method, self.path, self.action))
    }
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("action", &self.action)
            .field("reason", &self.reason)
            .finish()
    }
}

fn compile(pattern: &str, case_insensitive: bool) -> ApprovalResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .literal_separator(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ApprovalError::InvalidRule {
            tool: String::new(),
            message: format!("malformed glob '{pattern}': {e}"),
        })
}

/// One entry in a tool's ordered rule list.
#[derive(Clone)]
pub enum ApprovalRule {
    /// Static method/path pattern.
    Pattern(PatternRule),
    /// Runtime predicate over the raw arguments.
    Custom {
        /// Label used in logs and denial reasons.
        name: String,
        /// The predicate.
        predicate: Arc<dyn ApprovalPredicate>,
    },
}

impl ApprovalRule {
    /// Shorthand for a pattern rule.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidRule`] if either glob is malformed.
    pub fn pattern(
        method: impl Into<String>,
        path: impl Into<String>,
        action: RuleAction,
    ) -> ApprovalResult<Self> {
        PatternRule::new(method, path, action).map(Self::Pattern)
    }

    /// Wrap a predicate.
    #[must_use]
    pub fn custom(name: impl Into<String>, predicate: impl ApprovalPredicate + 'static) -> Self {
        Self::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate the rule, returning its action if it matches.
    #[must_use]
    pub fn evaluate(&self, operation: &Operation, arguments: &Value) -> Option<RuleAction> {
        match self {
            Self::Pattern(rule) => rule.matches(operation).then(|| rule.action()),
            Self::Custom { predicate, .. } => Some(predicate.evaluate(arguments)),
        }
    }

    /// Reason reported when this rule denies a call.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Pattern(rule) => rule.reason(),
            Self::Custom { name, .. } => format!("denied by custom rule '{name}'"),
        }
    }
}

impl fmt::Debug for ApprovalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(rule) => rule.fmt(f),
            Self::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish_non_exhaustive(),
        }
    }
}

/// The first rule that matched a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Index of the rule in the tool's list.
    pub index: usize,
    /// Its action.
    pub action: RuleAction,
    /// Its reason.
    pub reason: String,
}

/// Find the first matching rule.
#[must_use]
pub fn first_match(rules: &[ApprovalRule], operation: &Operation, arguments: &Value) -> Option<RuleMatch> {
    rules.iter().enumerate().find_map(|(index, rule)| {
        rule.evaluate(operation, arguments).map(|action| RuleMatch {
            index,
            action,
            reason: rule.reason(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(method: &str, path: &str) -> Operation {
        Operation::new(method, path)
    }

    #[test]
    fn test_pattern_wildcards() {
        let rule = PatternRule::new("*", "*", RuleAction::AutoApprove).unwrap();
        assert!(rule.matches(&op("GET", "/anything/at/all")));
        assert!(rule.matches(&op("CALL", "")));
    }

    #[test]
    fn test_pattern_method_case_insensitive() {
        let rule = PatternRule::new("delete", "/banks/*", RuleAction::AlwaysDeny).unwrap();
        assert!(rule.matches(&op("DELETE", "/banks/gh.29.uk")));
        assert!(!rule.matches(&op("GET", "/banks/gh.29.uk")));
    }

    #[test]
    fn test_pattern_star_crosses_segments() {
        let rule = PatternRule::new("POST", "/banks/*/accounts", RuleAction::RequireApproval).unwrap();
        assert!(rule.matches(&op("POST", "/banks/gh.29.uk/accounts")));
        assert!(rule.matches(&op("POST", "/banks/a/b/accounts")));
        assert!(!rule.matches(&op("POST", "/banks/a/accounts/1")));
    }

    #[test]
    fn test_pattern_alternation() {
        let rule = PatternRule::new("{PUT,PATCH}", "/users/*", RuleAction::RequireApproval).unwrap();
        assert!(rule.matches(&op("patch", "/users/1")));
        assert!(!rule.matches(&op("POST", "/users/1")));
    }

    #[test]
    fn test_malformed_glob_is_invalid_rule() {
        let err = PatternRule::new("GET", "/banks/[oops", RuleAction::AutoApprove).unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidRule { .. }));
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            ApprovalRule::pattern("GET", "/banks/secret/*", RuleAction::AlwaysDeny).unwrap(),
            ApprovalRule::pattern("GET", "*", RuleAction::AutoApprove).unwrap(),
        ];
        let args = json!({});
        let m = first_match(&rules, &op("GET", "/banks/secret/x"), &args).unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.action, RuleAction::AlwaysDeny);

        let m = first_match(&rules, &op("GET", "/banks/public"), &args).unwrap();
        assert_eq!(m.action, RuleAction::AutoApprove);

        assert!(first_match(&rules, &op("POST", "/banks"), &args).is_none());
    }

    #[test]
    fn test_custom_predicate_sees_arguments() {
        let rule = ApprovalRule::custom("small-amounts", |args: &Value| {
            match args.get("amount").and_then(Value::as_u64) {
                Some(n) if n <= 100 => RuleAction::AutoApprove,
                _ => RuleAction::RequireApproval,
            }
        });
        let o = op("POST", "/transfer");
        assert_eq!(rule.evaluate(&o, &json!({"amount": 5})), Some(RuleAction::AutoApprove));
        assert_eq!(
            rule.evaluate(&o, &json!({"amount": 5000})),
            Some(RuleAction::RequireApproval)
        );
        assert!(rule.reason().contains("small-amounts"));
    }

    #[test]
    fn test_reason_defaults_to_pattern() {
        let rule = PatternRule::new("DELETE", "*", RuleAction::AlwaysDeny).unwrap();
        assert_eq!(rule.reason(), "matched rule DELETE * -> always_deny");
        let rule = rule.with_reason("deletes disabled");
        assert_eq!(rule.reason(), "deletes disabled");
    }

    #[test]
    fn test_rule_action_parse() {
        assert_eq!("always_deny".parse::<RuleAction>(), Ok(RuleAction::AlwaysDeny));
        assert!("nope".parse::<RuleAction>().is_err());
    }
}
