//! Tool invocations awaiting a decision, and the principal they run for.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{CallId, MessageId, ThreadId};

/// Method used when a tool call carries no `method` argument.
pub const DEFAULT_METHOD: &str = "CALL";

/// The operation a tool call performs, derived from its arguments.
///
/// For HTTP-shaped tools this is the request method and path. The method is
/// always stored upper-cased so that `get` and `GET` name the same operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    /// Upper-cased method, e.g. `POST`.
    pub method: String,
    /// Target path, e.g. `/banks/gh.29.uk/accounts`.
    pub path: String,
}

impl Operation {
    /// Create an operation, normalizing the method to upper case.
    #[must_use]
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().trim().to_ascii_uppercase(),
            path: path.into(),
        }
    }

    /// Derive the operation from a tool call's arguments.
    ///
    /// Missing or non-string `method` becomes [`DEFAULT_METHOD`]; a missing
    /// `path` becomes the empty string.
    #[must_use]
    pub fn from_arguments(arguments: &serde_json::Value) -> Self {
        let method = arguments
            .get("method")
            .and_then(serde_json::Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_METHOD);
        let path = arguments
            .get("path")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        Self::new(method, path)
    }

    /// Key under which approval records for this operation are stored.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.method, self.path)
    }

    /// Human-readable summary, e.g. `POST request to /banks/x/accounts`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} request to {}", self.method, self.path)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A tool call the execution engine wants to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolInvocation {
    /// Name of the tool being invoked.
    pub tool: String,
    /// Engine-assigned call id.
    pub call_id: CallId,
    /// Raw arguments as produced by the model.
    pub arguments: serde_json::Value,
    /// Operation derived from `arguments`.
    pub operation: Operation,
    /// Assistant message that requested the call.
    pub message_id: MessageId,
}

impl PendingToolInvocation {
    /// Create a pending invocation, deriving its operation from `arguments`.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        call_id: CallId,
        arguments: serde_json::Value,
        message_id: MessageId,
    ) -> Self {
        let operation = Operation::from_arguments(&arguments);
        Self {
            tool: tool.into(),
            call_id,
            arguments,
            operation,
            message_id,
        }
    }
}

/// Who a decision is made for.
///
/// Session-scoped records are keyed by the thread, user-scoped records by the
/// user id. A principal without a user id can only hold session grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Thread the call runs in.
    pub thread_id: ThreadId,
    /// Authenticated user, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Principal {
    /// A principal bound to a thread with no known user.
    #[must_use]
    pub fn anonymous(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            user_id: None,
        }
    }

    /// A principal bound to a thread and a user.
    #[must_use]
    pub fn user(thread_id: ThreadId, user_id: impl Into<String>) -> Self {
        Self {
            thread_id,
            user_id: Some(user_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_normalizes_method() {
        let op = Operation::new("delete", "/banks/x");
        assert_eq!(op.method, "DELETE");
        assert_eq!(op.to_string(), "DELETE /banks/x");
        assert_eq!(op.key(), "DELETE:/banks/x");
        assert_eq!(op.summary(), "DELETE request to /banks/x");
    }

    #[test]
    fn test_operation_from_arguments_defaults() {
        let op = Operation::from_arguments(&json!({"query": "hello"}));
        assert_eq!(op.method, DEFAULT_METHOD);
        assert_eq!(op.path, "");

        let op = Operation::from_arguments(&json!({"method": 3, "path": "/x"}));
        assert_eq!(op.method, DEFAULT_METHOD);
        assert_eq!(op.path, "/x");
    }

    #[test]
    fn test_pending_invocation_derives_operation() {
        let call = PendingToolInvocation::new(
            "obp_requests",
            CallId::from("c1"),
            json!({"method": "get", "path": "/banks"}),
            MessageId::new(),
        );
        assert_eq!(call.operation, Operation::new("GET", "/banks"));
        assert_eq!(call.tool, "obp_requests");
    }

    #[test]
    fn test_principal_constructors() {
        let anon = Principal::anonymous(ThreadId::from("t"));
        assert!(anon.user_id.is_none());
        let json = serde_json::to_value(&anon).unwrap();
        assert!(json.get("user_id").is_none());

        let named = Principal::user(ThreadId::from("t"), "alice");
        assert_eq!(named.user_id.as_deref(), Some("alice"));
    }
}
