//! Configuration types for tollgate.
//!
//! These types mirror domain types as plain strings and numbers; conversion
//! into approval rules and stream settings happens at the service boundary.
//! Every struct implements [`Default`] so that a bare `[section]` header
//! produces a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Approval record lifetimes and the human wait bound.
    pub approval: ApprovalSection,
    /// Tool catalog: per-tool risk defaults and ordered rules.
    pub tools: Vec<ToolSection>,
    /// Stream translation and checkpoint settings.
    pub stream: StreamSection,
    /// Cancellation flag housekeeping.
    pub cancellation: CancellationSection,
    /// Translator repository housekeeping.
    pub repository: RepositorySection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

impl Config {
    /// Look up a tool section by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolSection> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Convert a seconds value where 0 means "no bound".
fn bounded_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// ApprovalSection
// ---------------------------------------------------------------------------

/// Lifetimes of persisted approval records, per scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// TTL of SESSION records in seconds. 0 = no expiry.
    pub session_ttl_secs: u64,
    /// TTL of USER records in seconds. 0 = no expiry.
    pub user_ttl_secs: u64,
    /// TTL of WORKSPACE records in seconds. 0 = no expiry.
    pub workspace_ttl_secs: u64,
    /// How long a suspended turn waits for a human. 0 = forever; unset falls
    /// back to the USER TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
}

impl ApprovalSection {
    /// SESSION record TTL, `None` when unbounded.
    #[must_use]
    pub fn session_ttl(&self) -> Option<Duration> {
        bounded_secs(self.session_ttl_secs)
    }

    /// USER record TTL, `None` when unbounded.
    #[must_use]
    pub fn user_ttl(&self) -> Option<Duration> {
        bounded_secs(self.user_ttl_secs)
    }

    /// WORKSPACE record TTL, `None` when unbounded.
    #[must_use]
    pub fn workspace_ttl(&self) -> Option<Duration> {
        bounded_secs(self.workspace_ttl_secs)
    }

    /// Effective bound on a human wait, `None` when unbounded.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        bounded_secs(self.wait_timeout_secs.unwrap_or(self.user_ttl_secs))
    }
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            session_ttl_secs: 86_400,
            user_ttl_secs: 86_400,
            workspace_ttl_secs: 0,
            wait_timeout_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ToolSection
// ---------------------------------------------------------------------------

/// One tool in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    /// Tool name as the execution engine reports it.
    pub name: String,
    /// Risk used when no rule matches and the method is not classified
    /// (`safe`, `moderate`, `dangerous`, `critical`).
    pub default_risk: String,
    /// Scopes a human may choose from (`once`, `session`, `user`,
    /// `workspace`).
    pub offered_scopes: Vec<String>,
    /// Summary shown to the human; `{method}`, `{path}` and `{tool}` are
    /// substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_template: Option<String>,
    /// Ordered rules. First match wins.
    pub rules: Vec<RuleSection>,
}

impl Default for ToolSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            default_risk: "dangerous".to_owned(),
            offered_scopes: vec!["once".to_owned(), "session".to_owned()],
            summary_template: None,
            rules: Vec::new(),
        }
    }
}

/// A static pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSection {
    /// Glob matched against the upper-cased method.
    pub method: String,
    /// Glob matched against the operation path.
    pub path: String,
    /// `auto_approve`, `require_approval` or `always_deny`.
    pub action: String,
    /// Human-readable reason, reported on denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Default for RuleSection {
    fn default() -> Self {
        Self {
            method: "*".to_owned(),
            path: "*".to_owned(),
            action: "require_approval".to_owned(),
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamSection
// ---------------------------------------------------------------------------

/// Stream translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Check the cancellation flag every this many emitted tokens.
    pub token_checkpoint_interval: u32,
    /// Emit a keep-alive frame after this many idle seconds. `0` disables
    /// keep-alives.
    pub keepalive_interval_secs: u64,
    /// Nodes whose model output is never shown to the user.
    pub internal_nodes: Vec<String>,
    /// Nodes that produce user-facing assistant messages.
    pub assistant_nodes: Vec<String>,
    /// Nodes that execute tools.
    pub tool_nodes: Vec<String>,
}

impl StreamSection {
    /// Idle interval before a keep-alive frame.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            token_checkpoint_interval: 16,
            keepalive_interval_secs: 15,
            internal_nodes: vec![
                "grade_documents".to_owned(),
                "transform_query".to_owned(),
                "retrieval_decider".to_owned(),
                "summarize_conversation".to_owned(),
            ],
            assistant_nodes: vec!["assistant".to_owned()],
            tool_nodes: vec!["tools".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// CancellationSection
// ---------------------------------------------------------------------------

/// Cancellation flag housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellationSection {
    /// Flags older than this are swept.
    pub max_flag_age_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
}

impl CancellationSection {
    /// Maximum flag age as a duration.
    #[must_use]
    pub fn max_flag_age(&self) -> Duration {
        Duration::from_secs(self.max_flag_age_secs)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CancellationSection {
    fn default() -> Self {
        Self {
            max_flag_age_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// RepositorySection
// ---------------------------------------------------------------------------

/// Translator repository housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    /// Translators idle for longer than this are evicted.
    pub idle_ttl_secs: u64,
}

impl RepositorySection {
    /// Idle TTL as a duration.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["tollgate_stream=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
