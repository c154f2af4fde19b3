//! McpRouter Gateway
//!
//! MCP router that provides:
//! - One shared session per backend server (stdio, remote, custom transports)
//! - A namespaced, profile-filtered catalog of tools, prompts and resources
//! - Request routing with per-request correlation, timeout and cancellation
//! - Hot reconciliation against the Profile Store
//! - Event-driven list_changed delivery with per-client backpressure

pub mod consumers;
pub mod error;
pub mod mcp;
pub mod pool;
pub mod server;
pub mod services;

pub use error::{RouterError, RouterResult};
pub use server::{GatewayState, HealthReport, RouterServer};

// Pool module
pub use pool::{
    // Session lifecycle
    BackendStatus, SessionManager, SessionManagerConfig, StartOutcome,
    // Catalog
    CapabilityAggregator, CatalogSnapshot, Namespace, Resolved,
    // Routing
    CallerContext, CorrelationTable, DispatchRequest, Dispatcher, TargetField,
    // Transports
    BackendLink, ConnectorRegistry, CustomConnector, LinkEvent, TransportFactory,
};

// Services module
pub use services::{ConfigWatcher, ConfigWatcherHandle, ProfileResolverService, ReconcileReport};

// MCP module (rmcp-based implementation)
pub use mcp::RouterHandler;

// Event-driven architecture consumers
pub use consumers::{ClientSink, ListKind, MCPNotifier};
