//! Thread persistence.

use std::sync::Arc;

use async_trait::async_trait;

use tollgate_core::ThreadId;
use tollgate_storage::{KvStore, ScopedKvStore};

use crate::error::CoordinatorResult;
use crate::thread::ExecutionThread;

/// Durable storage for execution threads.
///
/// The coordinator serializes access per thread; implementations only need
/// to be safe for concurrent calls on different threads.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Load a thread, or `None` if it was never saved.
    async fn load(&self, thread_id: &ThreadId) -> CoordinatorResult<Option<ExecutionThread>>;

    /// Save a thread, replacing any previous version.
    async fn save(&self, thread: &ExecutionThread) -> CoordinatorResult<()>;
}

/// [`ThreadStore`] that keeps threads as JSON in a key-value store.
#[derive(Debug, Clone)]
pub struct KvThreadStore {
    store: ScopedKvStore,
}

impl KvThreadStore {
    /// Namespace threads are stored under.
    pub const NAMESPACE: &'static str = "threads";

    /// Wrap a key-value store.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`](crate::CoordinatorError::Store) if
    /// the namespace is rejected.
    pub fn new(kv: Arc<dyn KvStore>) -> CoordinatorResult<Self> {
        Ok(Self {
            store: ScopedKvStore::new(kv, Self::NAMESPACE)?,
        })
    }

    /// Ids of all stored threads.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`](crate::CoordinatorError::Store) if
    /// the store fails.
    pub async fn thread_ids(&self) -> CoordinatorResult<Vec<ThreadId>> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .map(ThreadId::from)
            .collect())
    }
}

#[async_trait]
impl ThreadStore for KvThreadStore {
    async fn load(&self, thread_id: &ThreadId) -> CoordinatorResult<Option<ExecutionThread>> {
        Ok(self.store.get_json(thread_id.as_str()).await?)
    }

    async fn save(&self, thread: &ExecutionThread) -> CoordinatorResult<()> {
        self.store.set_json(thread.id.as_str(), thread).await?;
        tracing::trace!(thread_id = %thread.id, state = %thread.state, "thread saved");
        Ok(())
    }
}
