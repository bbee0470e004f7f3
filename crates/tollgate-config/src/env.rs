//! `TOLLGATE_*` environment variable overrides.
//!
//! Environment variables are the highest-precedence layer: they replace
//! whatever the defaults or the config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Whether a mapped field holds an integer or a string.
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Str,
    Int,
}

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    section: &'static str,
    key: &'static str,
    kind: FieldKind,
}

/// All supported `TOLLGATE_*` mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "TOLLGATE_LOG_LEVEL",
        section: "logging",
        key: "level",
        kind: FieldKind::Str,
    },
    EnvMapping {
        var_name: "TOLLGATE_LOG_FORMAT",
        section: "logging",
        key: "format",
        kind: FieldKind::Str,
    },
    EnvMapping {
        var_name: "TOLLGATE_APPROVAL_WAIT_TIMEOUT_SECS",
        section: "approval",
        key: "wait_timeout_secs",
        kind: FieldKind::Int,
    },
];

/// Apply environment overrides to the merged tree.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if an integer variable does not parse.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        let value = match mapping.kind {
            FieldKind::Str => toml::Value::String(raw.clone()),
            FieldKind::Int => {
                let parsed = raw.trim().parse::<i64>().map_err(|e| ConfigError::EnvError {
                    var_name: mapping.var_name.to_owned(),
                    message: format!("expected a non-negative integer: {e}"),
                })?;
                toml::Value::Integer(parsed)
            },
        };

        let Some(root) = merged.as_table_mut() else {
            continue;
        };
        let section = root
            .entry(mapping.section)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if let Some(table) = section.as_table_mut() {
            debug!(
                var = mapping.var_name,
                field = %format!("{}.{}", mapping.section, mapping.key),
                "applying env var override"
            );
            table.insert(mapping.key.to_owned(), value);
            count = count.saturating_add(1);
        }
    }

    Ok(count)
}

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
