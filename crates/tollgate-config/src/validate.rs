//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that the tool catalog is well formed.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Config, RuleSection, ToolSection};

/// Risk level names accepted in `default_risk`.
pub const RISK_LEVELS: &[&str] = &["safe", "moderate", "dangerous", "critical"];

/// Scope names accepted in `offered_scopes`.
pub const SCOPES: &[&str] = &["once", "session", "user", "workspace"];

/// Rule actions accepted in `[[tools.rules]]`.
pub const RULE_ACTIONS: &[&str] = &["auto_approve", "require_approval", "always_deny"];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_tools(config)?;
    validate_stream(config)?;
    validate_cancellation(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate_tools(config: &Config) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for (index, tool) in config.tools.iter().enumerate() {
        let field = format!("tools[{index}]");
        if tool.name.trim().is_empty() {
            return Err(invalid(format!("{field}.name"), "tool name must not be empty"));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(invalid(
                format!("{field}.name"),
                format!("duplicate tool '{}'", tool.name),
            ));
        }
        validate_tool(&field, tool)?;
    }
    Ok(())
}

fn validate_tool(field: &str, tool: &ToolSection) -> ConfigResult<()> {
    if !RISK_LEVELS.contains(&tool.default_risk.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            format!("{field}.default_risk"),
            format!(
                "unsupported risk level '{}'; expected one of: {}",
                tool.default_risk,
                RISK_LEVELS.join(", ")
            ),
        ));
    }

    if tool.offered_scopes.is_empty() {
        return Err(invalid(
            format!("{field}.offered_scopes"),
            "at least one scope must be offered",
        ));
    }
    for scope in &tool.offered_scopes {
        if !SCOPES.contains(&scope.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                format!("{field}.offered_scopes"),
                format!(
                    "unsupported scope '{scope}'; expected one of: {}",
                    SCOPES.join(", ")
                ),
            ));
        }
    }

    for (index, rule) in tool.rules.iter().enumerate() {
        validate_rule(&format!("{field}.rules[{index}]"), rule)?;
    }
    Ok(())
}

fn validate_rule(field: &str, rule: &RuleSection) -> ConfigResult<()> {
    if !RULE_ACTIONS.contains(&rule.action.as_str()) {
        return Err(invalid(
            format!("{field}.action"),
            format!(
                "unknown action '{}'; expected one of: {}",
                rule.action,
                RULE_ACTIONS.join(", ")
            ),
        ));
    }
    for (name, pattern) in [("method", &rule.method), ("path", &rule.path)] {
        if let Err(e) = globset::Glob::new(pattern) {
            return Err(invalid(
                format!("{field}.{name}"),
                format!("malformed glob '{pattern}': {e}"),
            ));
        }
    }
    Ok(())
}

fn validate_stream(config: &Config) -> ConfigResult<()> {
    if config.stream.token_checkpoint_interval == 0 {
        return Err(invalid(
            "stream.token_checkpoint_interval",
            "checkpoint interval must be at least 1",
        ));
    }
    Ok(())
}

fn validate_cancellation(config: &Config) -> ConfigResult<()> {
    if config.cancellation.sweep_interval_secs == 0 {
        return Err(invalid(
            "cancellation.sweep_interval_secs",
            "sweep interval must be at least 1 second",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_tool(tool: ToolSection) -> Config {
        Config {
            tools: vec![tool],
            ..Config::default()
        }
    }

    fn tool(name: &str) -> ToolSection {
        ToolSection {
            name: name.to_owned(),
            ..ToolSection::default()
        }
    }

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_empty_tool_name() {
        let err = validate(&with_tool(tool("  "))).unwrap_err();
        assert_eq!(field_of(err), "tools[0].name");
    }

    #[test]
    fn test_duplicate_tool_names() {
        let config = Config {
            tools: vec![tool("obp"), tool("obp")],
            ..Config::default()
        };
        let err = validate(&config).unwrap_err();
        assert_eq!(field_of(err), "tools[1].name");
    }

    #[test]
    fn test_unknown_risk_level() {
        let mut t = tool("obp");
        t.default_risk = "spicy".to_owned();
        assert!(validate(&with_tool(t)).is_err());
    }

    #[test]
    fn test_unknown_scope() {
        let mut t = tool("obp");
        t.offered_scopes = vec!["forever".to_owned()];
        let err = validate(&with_tool(t)).unwrap_err();
        assert_eq!(field_of(err), "tools[0].offered_scopes");
    }

    #[test]
    fn test_unknown_rule_action() {
        let mut t = tool("obp");
        t.rules.push(RuleSection {
            action: "maybe".to_owned(),
            ..RuleSection::default()
        });
        let err = validate(&with_tool(t)).unwrap_err();
        assert_eq!(field_of(err), "tools[0].rules[0].action");
    }

    #[test]
    fn test_malformed_glob() {
        let mut t = tool("obp");
        t.rules.push(RuleSection {
            path: "/banks/[unclosed".to_owned(),
            action: "always_deny".to_owned(),
            ..RuleSection::default()
        });
        let err = validate(&with_tool(t)).unwrap_err();
        assert_eq!(field_of(err), "tools[0].rules[0].path");
    }

    #[test]
    fn test_zero_checkpoint_interval() {
        let mut config = Config::default();
        config.stream.token_checkpoint_interval = 0;
        let err = validate(&config).unwrap_err();
        assert_eq!(field_of(err), "stream.token_checkpoint_interval");
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert!(validate(&config).is_err());
    }
}
