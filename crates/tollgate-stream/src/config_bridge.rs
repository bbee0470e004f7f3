//! Bridge from `tollgate_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module converts its sections into the types used by the decision engine,
//! the coordinator and the stream service, so the conversion happens once,
//! in one place.

use std::time::Duration;

use tollgate_approval::{
    ApprovalError, ApprovalResult, ApprovalRule, PatternRule, RecordTtls, RuleAction, ToolCatalog,
    ToolPolicy,
};
use tollgate_config::{Config, RuleSection, ToolSection};
use tollgate_core::{ApprovalScope, RiskLevel};
use tollgate_telemetry::{LogConfig, TelemetryResult};

use crate::service::StreamSettings;
use crate::translator::NodeRoles;

/// Build the tool catalog from the `[[tools]]` tables.
///
/// # Errors
///
/// Returns [`ApprovalError::InvalidRule`] naming the tool if a risk level,
/// scope, rule action or glob cannot be parsed.
pub fn to_tool_catalog(cfg: &Config) -> ApprovalResult<ToolCatalog> {
    let mut catalog = ToolCatalog::new();
    for tool in &cfg.tools {
        catalog.register(to_tool_policy(tool)?);
    }
    Ok(catalog)
}

fn to_tool_policy(tool: &ToolSection) -> ApprovalResult<ToolPolicy> {
    let invalid = |message: String| ApprovalError::InvalidRule {
        tool: tool.name.clone(),
        message,
    };

    let risk: RiskLevel = tool.default_risk.parse().map_err(invalid)?;
    let scopes = tool
        .offered_scopes
        .iter()
        .map(|s| s.parse::<ApprovalScope>().map_err(|e| invalid(e.to_string())))
        .collect::<ApprovalResult<Vec<_>>>()?;

    let mut policy = ToolPolicy::new(&tool.name)
        .with_default_risk(risk)
        .with_offered_scopes(scopes);
    if let Some(template) = &tool.summary_template {
        policy = policy.with_summary_template(template);
    }
    for rule in &tool.rules {
        policy = policy.with_rule(to_rule(&tool.name, rule)?);
    }
    Ok(policy)
}

fn to_rule(tool: &str, rule: &RuleSection) -> ApprovalResult<ApprovalRule> {
    let action: RuleAction = rule.action.parse().map_err(|message| ApprovalError::InvalidRule {
        tool: tool.to_string(),
        message,
    })?;
    let mut pattern = PatternRule::new(&rule.method, &rule.path, action).map_err(|e| match e {
        ApprovalError::InvalidRule { message, .. } => ApprovalError::InvalidRule {
            tool: tool.to_string(),
            message,
        },
        other => other,
    })?;
    if let Some(reason) = &rule.reason {
        pattern = pattern.with_reason(reason);
    }
    Ok(ApprovalRule::Pattern(pattern))
}

/// Record lifetimes from `[approval]`.
#[must_use]
pub fn to_record_ttls(cfg: &Config) -> RecordTtls {
    RecordTtls {
        session: cfg.approval.session_ttl(),
        user: cfg.approval.user_ttl(),
        workspace: cfg.approval.workspace_ttl(),
    }
}

/// How long a suspension waits for a human. `None` waits forever.
#[must_use]
pub fn to_wait_timeout(cfg: &Config) -> Option<Duration> {
    cfg.approval.wait_timeout()
}

/// Node roles from `[stream]`.
#[must_use]
pub fn to_node_roles(cfg: &Config) -> NodeRoles {
    NodeRoles::new()
        .with_internal(cfg.stream.internal_nodes.iter().cloned())
        .with_assistant(cfg.stream.assistant_nodes.iter().cloned())
        .with_tools(cfg.stream.tool_nodes.iter().cloned())
}

/// Stream service settings from `[stream]`, `[cancellation]` and
/// `[repository]`.
#[must_use]
pub fn to_stream_settings(cfg: &Config) -> StreamSettings {
    let keepalive = cfg.stream.keepalive_interval();
    StreamSettings {
        token_checkpoint_interval: cfg.stream.token_checkpoint_interval,
        keepalive_interval: (!keepalive.is_zero()).then_some(keepalive),
        roles: to_node_roles(cfg),
        translator_idle_ttl: cfg.repository.idle_ttl(),
        flag_max_age: cfg.cancellation.max_flag_age(),
        housekeeping_interval: cfg.cancellation.sweep_interval(),
    }
}

/// Logging setup from `[logging]`.
///
/// # Errors
///
/// Returns an error if the log format is not recognized.
pub fn to_log_config(cfg: &Config) -> TelemetryResult<LogConfig> {
    LogConfig::from_parts(
        &cfg.logging.level,
        &cfg.logging.format,
        &cfg.logging.directives,
    )
}
