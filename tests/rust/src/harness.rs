//! Router test harness
//!
//! Builds a real [`RouterServer`] over an in-memory Profile Store with the
//! fake connector registered, and offers the waits tests keep needing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcprouter_core::{
    BackendDefinition, EventReceiver, MemoryProfileStore, Profile, RouterConfig, RouterSnapshot,
    SessionState,
};
use mcprouter_gateway::{
    CallerContext, ConfigWatcher, ConnectorRegistry, DispatchRequest, Dispatcher, GatewayState,
    ReconcileReport, RouterResult, RouterServer, SessionManager, TargetField,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fake_backend::{FakeBackend, FakeConnector, FAKE_KIND};

/// Timings small enough for tests, probes effectively off
pub fn fast_config() -> RouterConfig {
    RouterConfig {
        request_timeout_ms: 2_000,
        connect_timeout_ms: 1_000,
        startup_attempts: 5,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        probe_interval_ms: 3_600_000,
        probe_timeout_ms: 100,
        probe_failure_threshold: 3,
        drain_timeout_ms: 2_000,
        shutdown_timeout_ms: 2_000,
        shutdown_grace_ms: 100,
        watch_interval_ms: 3_600_000,
        watch_debounce_ms: 10,
        ..RouterConfig::default()
    }
}

pub struct TestRouter {
    pub store: Arc<MemoryProfileStore>,
    pub connector: Arc<FakeConnector>,
    pub server: RouterServer,
    next_request: AtomicU64,
}

impl TestRouter {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        let store = Arc::new(MemoryProfileStore::new(RouterSnapshot::default()));
        let connector = FakeConnector::new();
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(FAKE_KIND, connector.clone());
        let server = RouterServer::new(config, store.clone(), registry);
        Self {
            store,
            connector,
            server,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        self.server.state().sessions()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.server.state().dispatcher
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.server.state().event_bus.subscribe()
    }

    /// Register a fake backend and put its definition in the store
    pub fn add_backend(&self, name: &str, tools: &[&str]) -> Arc<FakeBackend> {
        let backend = self.connector.add(FakeBackend::new(name, tools));
        self.store.upsert_server(backend.definition());
        backend
    }

    /// Put an arbitrary definition in the store
    pub fn define(&self, definition: BackendDefinition) {
        self.store.upsert_server(definition);
    }

    pub fn set_profile(&self, name: &str, servers: &[&str]) {
        self.store
            .upsert_profile(Profile::new(name, servers.iter().copied()));
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.server
            .watcher()
            .reconcile()
            .await
            .expect("reconcile against the memory store")
    }

    /// Caller bound to a profile, as the frontend would build it
    pub fn caller(&self, client: &str, profile: &str) -> CallerContext {
        CallerContext {
            client: client.to_string(),
            allowed: self.server.state().profiles.servers(profile),
        }
    }

    pub async fn call_tool(
        &self,
        caller: &CallerContext,
        name: &str,
        arguments: Value,
    ) -> RouterResult<Value> {
        self.call_tool_with(caller, name, arguments, CancellationToken::new())
            .await
    }

    pub async fn call_tool_with(
        &self,
        caller: &CallerContext,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> RouterResult<Value> {
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        self.dispatcher()
            .dispatch(
                DispatchRequest {
                    caller: caller.clone(),
                    request_id: request_id.to_string(),
                    kind: mcprouter_core::CapabilityKind::Tool,
                    method: "tools/call",
                    params: json!({"name": name, "arguments": arguments}),
                    target: TargetField::Name,
                    progress: None,
                },
                cancel,
            )
            .await
    }

    /// Exposed tool names visible to a caller
    pub fn tool_names(&self, caller: &CallerContext) -> Vec<String> {
        self.dispatcher()
            .catalog(mcprouter_core::CapabilityKind::Tool, caller)
            .iter()
            .filter_map(|t| t["name"].as_str().map(str::to_string))
            .collect()
    }

    pub async fn wait_for_state(&self, name: &str, state: SessionState, timeout: Duration) -> bool {
        wait_until(timeout, || self.sessions().state(name) == Some(state)).await
    }

    pub async fn wait_ready(&self, name: &str) -> bool {
        self.wait_for_state(name, SessionState::Ready, Duration::from_secs(5))
            .await
    }

    pub async fn shutdown(&self) {
        self.sessions().shutdown(Duration::from_secs(2)).await;
    }

    /// Serve HTTP on an ephemeral port in the background
    pub async fn serve_http(self) -> RunningRouter {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");

        let state = self.server.state().clone();
        let watcher = self.server.watcher().clone();
        let shutdown = self.server.shutdown_token();
        let task = tokio::spawn(self.server.serve_http(listener));

        RunningRouter {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            state,
            watcher,
            store: self.store,
            connector: self.connector,
            shutdown,
            task,
        }
    }
}

/// A router serving HTTP in the background
pub struct RunningRouter {
    pub base_url: String,
    pub state: Arc<GatewayState>,
    pub watcher: Arc<ConfigWatcher>,
    pub store: Arc<MemoryProfileStore>,
    pub connector: Arc<FakeConnector>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl RunningRouter {
    pub fn mcp_url(&self, profile: Option<&str>) -> String {
        match profile {
            Some(p) => format!("{}/mcp?profile={}", self.base_url, p),
            None => format!("{}/mcp", self.base_url),
        }
    }

    pub async fn wait_ready(&self, name: &str) -> bool {
        wait_until(Duration::from_secs(5), || {
            self.state.sessions().state(name) == Some(SessionState::Ready)
        })
        .await
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

impl Default for TestRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
