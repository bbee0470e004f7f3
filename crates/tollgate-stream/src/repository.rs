//! Long-lived translators, one per active thread.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use tollgate_core::ThreadId;

use crate::translator::{NodeRoles, Translator};

/// Why a connection wants a thread's translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A new user message: per-turn state is reset.
    NewTurn,
    /// An approval response: per-turn state is kept.
    Resume,
}

/// Exclusive use of a thread's translator for one connection.
pub type TranslatorLease = OwnedMutexGuard<Translator>;

#[derive(Debug)]
struct Slot {
    translator: Arc<Mutex<Translator>>,
    last_access: Instant,
}

/// Keeps one [`Translator`] per thread.
///
/// Concurrent requests for the same thread share a single translator and are
/// serialized on it.
#[derive(Debug)]
pub struct TranslatorRepository {
    roles: Arc<NodeRoles>,
    slots: DashMap<ThreadId, Slot>,
}

impl TranslatorRepository {
    /// An empty repository whose translators use `roles`.
    #[must_use]
    pub fn new(roles: NodeRoles) -> Self {
        Self {
            roles: Arc::new(roles),
            slots: DashMap::new(),
        }
    }

    /// Get or create the thread's translator and wait for exclusive use.
    ///
    /// For [`RequestKind::NewTurn`] the translator's per-turn state is reset;
    /// for [`RequestKind::Resume`] it is kept.
    pub async fn get_or_create(&self, thread_id: &ThreadId, kind: RequestKind) -> TranslatorLease {
        let translator = {
            let mut slot = self.slots.entry(thread_id.clone()).or_insert_with(|| {
                tracing::debug!(thread_id = %thread_id, "creating translator");
                Slot {
                    translator: Arc::new(Mutex::new(Translator::new(
                        thread_id.clone(),
                        Arc::clone(&self.roles),
                    ))),
                    last_access: Instant::now(),
                }
            });
            slot.last_access = Instant::now();
            Arc::clone(&slot.translator)
        };

        let mut lease = translator.lock_owned().await;
        match kind {
            RequestKind::NewTurn => lease.reset(),
            RequestKind::Resume => lease.begin_resume(),
        }
        lease
    }

    /// Evict translators not accessed within `max_age` and not in use.
    ///
    /// A translator halted on an approval request carries the message the
    /// resumed run attaches its tool events to. It is kept until
    /// `suspended_max_age` instead, or for as long as it stays halted when
    /// that is `None`.
    ///
    /// Returns how many were evicted.
    pub fn cleanup_inactive(&self, max_age: Duration, suspended_max_age: Option<Duration>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|thread_id, slot| {
            let in_use = Arc::strong_count(&slot.translator) > 1;
            let idle = slot.last_access.elapsed();
            let suspended = slot.translator.try_lock().is_ok_and(|t| t.is_halted());
            let keep = in_use
                || idle < max_age
                || (suspended && suspended_max_age.is_none_or(|limit| idle < limit));
            if !keep {
                tracing::info!(thread_id = %thread_id, suspended, "evicting inactive translator");
            }
            keep
        });
        before.saturating_sub(self.slots.len())
    }

    /// Drop a thread's translator.
    pub fn remove(&self, thread_id: &ThreadId) -> bool {
        self.slots.remove(thread_id).is_some()
    }

    /// Whether the thread has a translator.
    #[must_use]
    pub fn contains(&self, thread_id: &ThreadId) -> bool {
        self.slots.contains_key(thread_id)
    }

    /// Number of translators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for TranslatorRepository {
    fn default() -> Self {
        Self::new(NodeRoles::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tollgate_approval::{ApprovalContext, SimilarHistory, ToolPolicy};
    use tollgate_core::{CallId, MessageId, PendingToolInvocation, SuspensionId};
    use tollgate_runtime::{SuspendSignal, TraceEvent};

    #[tokio::test]
    async fn test_get_or_create_reuses_translator() {
        let repo = TranslatorRepository::default();
        let thread = ThreadId::from("t-1");

        {
            let mut lease = repo.get_or_create(&thread, RequestKind::NewTurn).await;
            lease.translate(&TraceEvent::tool_start("tools", "c1", "obp_requests", json!({})));
        }
        {
            let lease = repo.get_or_create(&thread, RequestKind::Resume).await;
            assert_eq!(lease.in_flight().len(), 1);
        }
        {
            let lease = repo.get_or_create(&thread, RequestKind::NewTurn).await;
            assert!(lease.in_flight().is_empty());
        }
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_translator() {
        let repo = Arc::new(TranslatorRepository::default());
        let thread = ThreadId::from("t-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let thread = thread.clone();
            handles.push(tokio::spawn(async move {
                let mut lease = repo.get_or_create(&thread, RequestKind::Resume).await;
                lease.translate(&TraceEvent::token("assistant", "x"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.len(), 1);
        let lease = repo.get_or_create(&thread, RequestKind::Resume).await;
        assert_eq!(lease.tokens_emitted(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_inactive_evicts_idle_translators() {
        let repo = TranslatorRepository::default();
        let idle = ThreadId::from("idle");
        let busy = ThreadId::from("busy");
        drop(repo.get_or_create(&idle, RequestKind::NewTurn).await);
        let held = repo.get_or_create(&busy, RequestKind::NewTurn).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(300), None), 0);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(300), None), 1);
        assert!(!repo.contains(&idle));
        assert!(repo.contains(&busy));

        drop(held);
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(300), None), 1);
        assert!(repo.is_empty());
    }

    fn suspend(lease: &mut TranslatorLease, thread: &ThreadId) {
        let call = PendingToolInvocation::new(
            "obp_requests",
            CallId::from("call_1"),
            json!({"method": "POST", "path": "/banks/x/accounts"}),
            MessageId::new(),
        );
        let signal = SuspendSignal {
            suspension_id: SuspensionId::new(),
            thread_id: thread.clone(),
            requests: vec![ApprovalContext::build(
                &ToolPolicy::new("obp_requests"),
                &call,
                SimilarHistory::default(),
            )],
            resolved: Vec::new(),
            deadline: None,
        };
        lease.translate(&TraceEvent::model_start("assistant"));
        lease.translate(&TraceEvent::interrupt("human_review", &signal).unwrap());
        assert!(lease.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_keeps_translators_awaiting_approval() {
        let repo = TranslatorRepository::new(NodeRoles::new().with_assistant(["assistant"]));
        let waiting = ThreadId::from("waiting");
        let idle = ThreadId::from("idle");
        let message_id = {
            let mut lease = repo.get_or_create(&waiting, RequestKind::NewTurn).await;
            suspend(&mut lease, &waiting);
            lease.message_id()
        };
        assert!(message_id.is_some());
        drop(repo.get_or_create(&idle, RequestKind::NewTurn).await);

        tokio::time::advance(Duration::from_secs(7200)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(3600), Some(Duration::from_secs(86_400))), 1);
        assert!(repo.contains(&waiting));
        assert!(!repo.contains(&idle));

        // The resumed run still sees the suspended turn's message.
        {
            let lease = repo.get_or_create(&waiting, RequestKind::Resume).await;
            assert_eq!(lease.message_id(), message_id);
        }

        // Once resumed the translator is ordinary again.
        tokio::time::advance(Duration::from_secs(7200)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(3600), None), 1);
        assert!(repo.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_suspended_translators_past_the_wait_bound() {
        let repo = TranslatorRepository::default();
        let waiting = ThreadId::from("waiting");
        {
            let mut lease = repo.get_or_create(&waiting, RequestKind::NewTurn).await;
            suspend(&mut lease, &waiting);
        }

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(300), Some(Duration::from_secs(900))), 0);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(repo.cleanup_inactive(Duration::from_secs(300), Some(Duration::from_secs(900))), 1);
    }
}
