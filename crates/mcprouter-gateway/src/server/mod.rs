//! Gateway Server
//!
//! Wires the router together and serves it, either over MCP streamable HTTP
//! (many concurrent clients) or over stdio (one client bound to a profile).
//!
//! Component graph:
//! `EventBus` → `CapabilityAggregator` → `SessionManager` → `Dispatcher`
//! → `MCPNotifier` / `RouterHandler`, with the `ConfigWatcher` driving the
//! session manager from the Profile Store.

mod handlers;
mod state;

pub use state::{GatewayState, HealthReport};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use chrono::Utc;
use mcprouter_core::{create_shared_event_bus, DomainEvent, ProfileStore, RouterConfig};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::consumers::MCPNotifier;
use crate::mcp::RouterHandler;
use crate::pool::{
    CapabilityAggregator, ConnectorRegistry, CorrelationTable, Dispatcher, Namespace,
    SessionManager, SessionManagerConfig,
};
use crate::services::{ConfigWatcher, ConfigWatcherHandle, ProfileResolverService};

/// MCP Router server
///
/// Owns the component graph. Backends are started from the Profile Store
/// when one of the `run_*` methods is called.
pub struct RouterServer {
    config: RouterConfig,
    state: Arc<GatewayState>,
    watcher: Arc<ConfigWatcher>,
    shutdown: CancellationToken,
}

impl RouterServer {
    pub fn new(
        config: RouterConfig,
        store: Arc<dyn ProfileStore>,
        connectors: Arc<ConnectorRegistry>,
    ) -> Self {
        info!(store = %store.describe(), "[Gateway] Initializing...");

        let event_bus = create_shared_event_bus();
        let aggregator = Arc::new(CapabilityAggregator::new(
            Namespace::new(config.namespace_separator.clone()),
            Some(event_bus.sender()),
        ));
        let sessions = SessionManager::new(
            SessionManagerConfig::from(&config),
            aggregator,
            connectors,
            event_bus.sender(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            Arc::new(CorrelationTable::new()),
        ));
        let profiles = Arc::new(ProfileResolverService::new(config.default_profile.clone()));
        let notifier = Arc::new(MCPNotifier::new(
            event_bus.clone(),
            profiles.clone(),
            config.client_queue_capacity,
            config.backpressure,
        ));
        let watcher = Arc::new(ConfigWatcher::new(
            store,
            sessions,
            profiles.clone(),
            event_bus.sender(),
            config.watch_interval(),
            config.watch_debounce(),
        ));

        let state = Arc::new(GatewayState {
            dispatcher,
            notifier,
            profiles,
            event_bus,
            namespace_separator: config.namespace_separator.clone(),
            started_at: Utc::now(),
        });

        Self {
            config,
            state,
            watcher,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    pub fn watcher(&self) -> &Arc<ConfigWatcher> {
        &self.watcher
    }

    /// Cancel to stop serving and shut every backend down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// A handler for one client session
    pub fn handler(&self, fixed_profile: Option<String>) -> RouterHandler {
        RouterHandler::new(self.state.clone(), fixed_profile)
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        let state = self.state.clone();

        // Stateful streamable HTTP: Mcp-Session-Id, GET for the SSE stream,
        // DELETE for termination. Each session gets its own handler.
        let mcp_service = StreamableHttpService::new(
            move || {
                debug!("[Gateway] Creating handler instance for MCP session");
                Ok(RouterHandler::new(state.clone(), None))
            },
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(Duration::from_secs(30)),
                sse_retry: Some(Duration::from_secs(3)),
                cancellation_token: self.shutdown.child_token(),
            },
        );

        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .with_state(self.state.clone())
            .nest_service("/mcp", mcp_service)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Bind the configured address and serve HTTP until shutdown
    pub async fn run_http(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.serve_http(listener).await
    }

    /// Serve HTTP on an already bound listener until shutdown
    pub async fn serve_http(self, listener: TcpListener) -> Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        info!("[Gateway] Starting on {}", local);
        info!(
            "[Gateway] CORS: {}",
            if self.config.enable_cors {
                "enabled"
            } else {
                "disabled"
            }
        );

        let watcher = self.start_backends().await?;
        let router = self.build_router();

        let url = format!("http://{}/mcp", local);
        info!("[Gateway] Ready to accept connections at {}", url);
        self.state.event_bus.sender().emit(DomainEvent::GatewayStarted {
            url,
            port: local.port(),
        });

        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = &served {
            error!("[Gateway] Server error: {}", e);
        }

        self.stop_backends(watcher).await;
        served.context("HTTP server failed")
    }

    /// Serve one client over stdin/stdout, bound to `profile`
    pub async fn run_stdio(self, profile: String) -> Result<()> {
        let watcher = self.start_backends().await?;

        if let Err(e) = self.state.profiles.resolve(Some(&profile)) {
            self.stop_backends(watcher).await;
            return Err(e).context("Cannot serve stdio");
        }

        info!(profile = %profile, "[Gateway] Serving on stdio");
        let handler = self.handler(Some(profile));
        let served = match handler.serve(rmcp::transport::stdio()).await {
            Ok(service) => {
                tokio::select! {
                    result = service.waiting() => match result {
                        Ok(reason) => {
                            info!("[Gateway] Stdio client finished: {:?}", reason);
                            Ok(())
                        }
                        Err(e) => Err(anyhow::anyhow!("stdio session task failed: {}", e)),
                    },
                    _ = self.shutdown.cancelled() => {
                        info!("[Gateway] Shutdown requested, closing stdio session");
                        Ok(())
                    }
                }
            }
            Err(e) => Err(anyhow::anyhow!("stdio handshake failed: {}", e)),
        };

        self.stop_backends(watcher).await;
        served
    }

    /// Initial reconcile, then keep watching the store
    async fn start_backends(&self) -> Result<ConfigWatcherHandle> {
        match self.watcher.reconcile().await {
            Ok(report) => info!(
                started = report.started.len(),
                rejected = report.rejected.len(),
                "[Gateway] Backends starting in background"
            ),
            Err(e) => warn!("[Gateway] Initial profile load failed, waiting for a fix: {:#}", e),
        }
        self.watcher.clone().spawn(self.shutdown.child_token())
    }

    async fn stop_backends(&self, watcher: ConfigWatcherHandle) {
        self.shutdown.cancel();
        watcher.join().await;
        self.state
            .sessions()
            .shutdown(self.config.shutdown_timeout())
            .await;
        self.state.event_bus.sender().emit(DomainEvent::GatewayStopped);
        info!("[Gateway] Stopped");
    }
}
