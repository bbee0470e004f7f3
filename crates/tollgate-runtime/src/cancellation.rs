//! Cooperative per-thread cancellation.
//!
//! A stop request or a detected client disconnect raises a flag for the
//! thread. Running turns observe it at their checkpoints through the
//! [`CancellationToken`] handed out by [`CancellationRegistry::register_turn`];
//! nothing is ever killed outright.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tollgate_core::{ThreadId, Timestamp};

/// A raised cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationFlag {
    /// Thread the request targets.
    pub thread_id: ThreadId,
    /// When the flag was first raised.
    pub set_at: Timestamp,
}

/// Snapshot of the registry for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancellationStats {
    /// Raised flags.
    pub count: usize,
    /// Age of the oldest flag.
    pub oldest: Option<Duration>,
    /// Age of the newest flag.
    pub newest: Option<Duration>,
}

/// Thread-safe registry of cancellation flags and live turn tokens.
///
/// Every operation is idempotent and safe to call concurrently from the
/// request path and the streaming loop.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: DashMap<ThreadId, CancellationFlag>,
    turns: DashMap<ThreadId, CancellationToken>,
}

impl CancellationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag for a thread and cancel its running turn, if any.
    ///
    /// Returns `true` if the flag was not already raised. Repeated requests
    /// keep the original timestamp.
    pub fn request(&self, thread_id: &ThreadId) -> bool {
        let newly_set = match self.flags.entry(thread_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CancellationFlag {
                    thread_id: thread_id.clone(),
                    set_at: Timestamp::now(),
                });
                true
            },
        };
        if let Some(token) = self.turns.get(thread_id) {
            token.cancel();
        }
        if newly_set {
            tracing::info!(thread_id = %thread_id, "cancellation requested");
        }
        newly_set
    }

    /// Whether the thread's flag is raised.
    #[must_use]
    pub fn is_cancelled(&self, thread_id: &ThreadId) -> bool {
        self.flags.contains_key(thread_id)
    }

    /// Lower the flag. Returns `true` if it was raised.
    pub fn clear(&self, thread_id: &ThreadId) -> bool {
        let cleared = self.flags.remove(thread_id).is_some();
        if cleared {
            tracing::debug!(thread_id = %thread_id, "cancellation flag cleared");
        }
        cleared
    }

    /// Remove flags at least `max_age` old. Returns the number removed.
    ///
    /// `sweep(Duration::ZERO)` removes every flag.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let before = self.flags.len();
        self.flags.retain(|_, flag| flag.set_at.age() < max_age);
        let removed = before.saturating_sub(self.flags.len());
        if removed > 0 {
            tracing::debug!(removed, "swept stale cancellation flags");
        }
        removed
    }

    /// All raised flags.
    #[must_use]
    pub fn active(&self) -> Vec<CancellationFlag> {
        self.flags.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Count and age range of the raised flags.
    #[must_use]
    pub fn stats(&self) -> CancellationStats {
        let ages: Vec<Duration> = self.flags.iter().map(|e| e.set_at.age()).collect();
        CancellationStats {
            count: ages.len(),
            oldest: ages.iter().copied().max(),
            newest: ages.iter().copied().min(),
        }
    }

    /// Hand out a fresh token for a new turn on the thread.
    ///
    /// The token is already cancelled if the thread's flag is raised.
    #[must_use]
    pub fn register_turn(&self, thread_id: &ThreadId) -> CancellationToken {
        let token = CancellationToken::new();
        if self.is_cancelled(thread_id) {
            token.cancel();
        }
        self.turns.insert(thread_id.clone(), token.clone());
        token
    }

    /// Forget the thread's turn token.
    pub fn finish_turn(&self, thread_id: &ThreadId) {
        self.turns.remove(thread_id);
    }

    /// Spawn a task that sweeps flags older than `max_age` every `interval`
    /// until `shutdown` fires.
    #[must_use]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep(max_age);
                    },
                }
            }
            tracing::debug!("cancellation sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: &str) -> ThreadId {
        ThreadId::from(id)
    }

    #[test]
    fn test_request_clear_roundtrip() {
        let registry = CancellationRegistry::new();
        let t = thread("t1");

        assert!(!registry.is_cancelled(&t));
        assert!(registry.request(&t));
        assert!(registry.is_cancelled(&t));
        assert!(!registry.request(&t));

        assert!(registry.clear(&t));
        assert!(!registry.is_cancelled(&t));
        assert!(!registry.clear(&t));
    }

    #[test]
    fn test_repeated_request_keeps_timestamp() {
        let registry = CancellationRegistry::new();
        let t = thread("t1");
        registry.request(&t);
        let first = registry.active()[0].set_at;
        registry.request(&t);
        assert_eq!(registry.active()[0].set_at, first);
    }

    #[test]
    fn test_sweep_zero_clears_all() {
        let registry = CancellationRegistry::new();
        registry.request(&thread("a"));
        registry.request(&thread("b"));
        assert_eq!(registry.sweep(Duration::ZERO), 2);
        assert!(registry.active().is_empty());
    }

    #[test]
    fn test_sweep_keeps_fresh_flags() {
        let registry = CancellationRegistry::new();
        registry.request(&thread("a"));
        assert_eq!(registry.sweep(Duration::from_secs(600)), 0);
        assert_eq!(registry.stats().count, 1);
    }

    #[test]
    fn test_request_cancels_registered_turn() {
        let registry = CancellationRegistry::new();
        let t = thread("t1");
        let token = registry.register_turn(&t);
        assert!(!token.is_cancelled());

        registry.request(&t);
        assert!(token.is_cancelled());

        registry.finish_turn(&t);
        registry.clear(&t);
        assert!(!registry.register_turn(&t).is_cancelled());
    }

    #[test]
    fn test_register_after_request_is_precancelled() {
        let registry = CancellationRegistry::new();
        let t = thread("t1");
        registry.request(&t);
        assert!(registry.register_turn(&t).is_cancelled());
    }

    #[test]
    fn test_stats_empty() {
        let registry = CancellationRegistry::new();
        assert_eq!(registry.stats(), CancellationStats::default());
    }

    #[tokio::test]
    async fn test_concurrent_requests() {
        let registry = Arc::new(CancellationRegistry::new());
        let mut handles = Vec::new();
        for i in 0..4 {
            for _ in 0..4 {
                let registry = Arc::clone(&registry);
                handles.push(tokio::spawn(async move {
                    let t = ThreadId::from(format!("t{i}"));
                    registry.request(&t);
                    registry.is_cancelled(&t)
                }));
            }
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.stats().count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_shutdown() {
        let registry = Arc::new(CancellationRegistry::new());
        registry.request(&thread("t"));
        let shutdown = CancellationToken::new();
        let handle = registry.spawn_sweeper(Duration::from_secs(1), Duration::ZERO, shutdown.clone());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.active().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
