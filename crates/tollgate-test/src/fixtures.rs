//! Test fixtures and a wired-up stream service.

use std::sync::{Arc, Once};
use std::time::Duration;

use tollgate_approval::{ApprovalRule, DecisionEngine, RecordTtls, RuleAction, ToolCatalog, ToolPolicy};
use tollgate_core::{ApprovalScope, ThreadId};
use tollgate_runtime::{CancellationRegistry, Coordinator, KvThreadStore};
use tollgate_storage::{KvStore, MemoryKvStore};
use tollgate_stream::{NodeRoles, StreamService, StreamSettings};

use crate::engine::{ASSISTANT_NODE, ScriptedEngine, TOOLS_NODE};

/// Name of the fixture HTTP tool.
pub const HTTP_TOOL: &str = "obp_requests";

/// Catalog with one HTTP tool: `DELETE` is always denied, reads are safe,
/// everything else asks. All four scopes are offered.
#[must_use]
pub fn test_catalog() -> ToolCatalog {
    ToolCatalog::new().with_tool(test_http_policy())
}

/// The fixture HTTP tool's policy.
#[must_use]
pub fn test_http_policy() -> ToolPolicy {
    ToolPolicy::new(HTTP_TOOL)
        .with_rule(
            ApprovalRule::pattern("DELETE", "*", RuleAction::AlwaysDeny)
                .expect("fixture glob is well formed"),
        )
        .with_offered_scopes(vec![
            ApprovalScope::Once,
            ApprovalScope::Session,
            ApprovalScope::User,
            ApprovalScope::Workspace,
        ])
}

/// Stream settings with small intervals suited to tests.
#[must_use]
pub fn test_settings() -> StreamSettings {
    StreamSettings {
        token_checkpoint_interval: 1,
        keepalive_interval: None,
        roles: NodeRoles::new()
            .with_internal(["grade_documents"])
            .with_assistant([ASSISTANT_NODE])
            .with_tools([TOOLS_NODE]),
        ..StreamSettings::default()
    }
}

/// A fresh random thread id.
#[must_use]
pub fn test_thread_id() -> ThreadId {
    ThreadId::new()
}

/// Route `tracing` output to the test writer once per process.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A stream service wired to an in-memory store and a scripted engine.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The service under test.
    pub service: Arc<StreamService>,
    /// The engine; clones share its scripts and recordings.
    pub engine: ScriptedEngine,
    /// The backing store.
    pub kv: Arc<MemoryKvStore>,
}

impl TestHarness {
    /// Build a harness around `engine` with [`test_catalog`].
    #[must_use]
    pub fn new(engine: ScriptedEngine) -> Self {
        Self::builder(engine).build()
    }

    /// Start configuring a harness.
    #[must_use]
    pub fn builder(engine: ScriptedEngine) -> TestHarnessBuilder {
        TestHarnessBuilder {
            engine,
            catalog: test_catalog(),
            ttls: RecordTtls::default(),
            wait_timeout: None,
            settings: test_settings(),
            kv: Arc::new(MemoryKvStore::new()),
        }
    }
}

/// Builder for [`TestHarness`].
#[derive(Debug)]
pub struct TestHarnessBuilder {
    engine: ScriptedEngine,
    catalog: ToolCatalog,
    ttls: RecordTtls,
    wait_timeout: Option<Duration>,
    settings: StreamSettings,
    kv: Arc<MemoryKvStore>,
}

impl TestHarnessBuilder {
    /// Use `catalog` instead of [`test_catalog`].
    #[must_use]
    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Record lifetimes.
    #[must_use]
    pub fn ttls(mut self, ttls: RecordTtls) -> Self {
        self.ttls = ttls;
        self
    }

    /// Bound how long a suspension waits for a human.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Stream settings.
    #[must_use]
    pub fn settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a store, e.g. to simulate a restart.
    #[must_use]
    pub fn kv(mut self, kv: Arc<MemoryKvStore>) -> Self {
        self.kv = kv;
        self
    }

    /// Wire everything together.
    ///
    /// # Panics
    ///
    /// Panics if the thread store cannot be opened on the in-memory store.
    #[must_use]
    pub fn build(self) -> TestHarness {
        let store: Arc<dyn KvStore> = self.kv.clone();
        let decisions = DecisionEngine::new(self.catalog, Arc::clone(&store), self.ttls);
        let threads = Arc::new(KvThreadStore::new(store).expect("failed to open thread store"));
        let coordinator =
            Arc::new(Coordinator::new(decisions, threads).with_wait_timeout(self.wait_timeout));
        let service = StreamService::new(
            coordinator,
            Arc::new(self.engine.clone()),
            Arc::new(CancellationRegistry::new()),
            self.settings,
        );
        TestHarness {
            service: Arc::new(service),
            engine: self.engine,
            kv: self.kv,
        }
    }
}
