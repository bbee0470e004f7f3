//! Persisted approval decisions, one tier per scope.
//!
//! Records live in a [`KvStore`] under one namespace per tier:
//!
//! | Scope | Namespace |
//! |-------|-----------|
//! | SESSION | `approvals/session/{thread_id}` |
//! | USER | `approvals/user/{user_id}` |
//! | WORKSPACE | `approvals/workspace` |
//!
//! keyed by `{tool}:{METHOD}:{path}`. ONCE decisions are never written.
//! Writes to a key are last-write-wins.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tollgate_core::{ApprovalScope, Operation, Principal, Timestamp};
use tollgate_storage::{KvStore, StorageError};

use crate::error::{ApprovalError, ApprovalResult};

/// One persisted approval decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Tool the decision covers.
    pub tool: String,
    /// Operation the decision covers.
    pub operation: Operation,
    /// Tier the record lives in.
    pub scope: ApprovalScope,
    /// The decision.
    pub approved: bool,
    /// When the decision was made.
    pub created_at: Timestamp,
    /// Lifetime in seconds; `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl ApprovalRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        operation: Operation,
        scope: ApprovalScope,
        approved: bool,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            tool: tool.into(),
            operation,
            scope,
            approved,
            created_at: Timestamp::now(),
            ttl_secs: ttl.map(|d| d.as_secs()),
        }
    }

    /// Whether the record has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.ttl_secs
            .is_some_and(|ttl| self.created_at.is_older_than(Duration::from_secs(ttl)))
    }

    /// Lifetime left before the record expires. `None` never expires.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.ttl_secs
            .map(|ttl| Duration::from_secs(ttl).saturating_sub(self.created_at.age()))
    }

    /// Seconds since the decision was made.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        self.created_at.age().as_secs()
    }
}

/// Record lifetimes per tier. `None` means no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTtls {
    /// SESSION lifetime.
    pub session: Option<Duration>,
    /// USER lifetime.
    pub user: Option<Duration>,
    /// WORKSPACE lifetime.
    pub workspace: Option<Duration>,
}

impl RecordTtls {
    /// Lifetime for `scope`. ONCE records have none because they are never
    /// stored.
    #[must_use]
    pub fn for_scope(&self, scope: ApprovalScope) -> Option<Duration> {
        match scope {
            ApprovalScope::Once => None,
            ApprovalScope::Session => self.session,
            ApprovalScope::User => self.user,
            ApprovalScope::Workspace => self.workspace,
        }
    }
}

impl Default for RecordTtls {
    fn default() -> Self {
        Self {
            session: Some(Duration::from_secs(86_400)),
            user: Some(Duration::from_secs(86_400)),
            workspace: None,
        }
    }
}

/// Storage key of a record within its tier.
#[must_use]
pub fn record_key(tool: &str, operation: &Operation) -> String {
    format!("{tool}:{}", operation.key())
}

/// Namespace of `scope` for `principal`.
///
/// Returns `None` for ONCE, and for USER when the principal has no user id.
#[must_use]
pub fn tier_namespace(scope: ApprovalScope, principal: &Principal) -> Option<String> {
    match scope {
        ApprovalScope::Once => None,
        ApprovalScope::Session => Some(format!("approvals/session/{}", principal.thread_id)),
        ApprovalScope::User => principal
            .user_id
            .as_ref()
            .map(|user| format!("approvals/user/{user}")),
        ApprovalScope::Workspace => Some("approvals/workspace".to_string()),
    }
}

/// Typed access to the approval tiers.
#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KvStore>,
    ttls: RecordTtls,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Wrap a key-value store.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttls: RecordTtls) -> Self {
        Self { kv, ttls }
    }

    /// Configured lifetimes.
    #[must_use]
    pub fn ttls(&self) -> RecordTtls {
        self.ttls
    }

    /// Read one record.
    ///
    /// An expired record is deleted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::CorruptedRecord`] if the stored bytes do not
    /// decode, and [`ApprovalError::Storage`] if the store fails.
    pub async fn read(
        &self,
        namespace: &str,
        tool: &str,
        operation: &Operation,
    ) -> ApprovalResult<Option<ApprovalRecord>> {
        let key = record_key(tool, operation);
        let Some(bytes) = self.kv.get(namespace, &key).await? else {
            return Ok(None);
        };
        let record: ApprovalRecord =
            serde_json::from_slice(&bytes).map_err(|e| ApprovalError::CorruptedRecord {
                key: format!("{namespace}/{key}"),
                message: e.to_string(),
            })?;

        if record.is_expired() {
            tracing::debug!(namespace, key = %key, "purging expired approval record");
            if let Err(e) = self.kv.delete(namespace, &key).await {
                tracing::warn!(namespace, key = %key, error = %e, "failed to purge expired record");
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Write a record into the tier named by its scope.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if serialization or the store fails.
    pub async fn write(&self, namespace: &str, record: &ApprovalRecord) -> ApprovalResult<()> {
        let key = record_key(&record.tool, &record.operation);
        let bytes = serde_json::to_vec(record)
            .map_err(|e| ApprovalError::from(StorageError::Serialization(e.to_string())))?;
        match record.ttl_secs {
            Some(ttl) => {
                self.kv
                    .set_with_ttl(namespace, &key, bytes, Duration::from_secs(ttl))
                    .await?;
            },
            None => self.kv.set(namespace, &key, bytes).await?,
        }
        Ok(())
    }

    /// Delete one record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn remove(
        &self,
        namespace: &str,
        tool: &str,
        operation: &Operation,
    ) -> ApprovalResult<bool> {
        Ok(self.kv.delete(namespace, &record_key(tool, operation)).await?)
    }

    /// Delete a whole tier. Returns the number of live records removed.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn clear(&self, namespace: &str) -> ApprovalResult<u64> {
        Ok(self.kv.clear_namespace(namespace).await?)
    }

    /// All decodable, unexpired records in a tier, oldest first.
    ///
    /// Undecodable entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Storage`] if the store fails.
    pub async fn list(&self, namespace: &str) -> ApprovalResult<Vec<ApprovalRecord>> {
        let mut records = Vec::new();
        for key in self.kv.list_keys(namespace).await? {
            let Some(bytes) = self.kv.get(namespace, &key).await? else {
                continue;
            };
            match serde_json::from_slice::<ApprovalRecord>(&bytes) {
                Ok(record) if !record.is_expired() => records.push(record),
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!(namespace, key = %key, error = %e, "skipping corrupted approval record");
                },
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
