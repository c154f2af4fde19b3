//! Transport abstraction for backend connections
//!
//! Every backend transport produces the same thing: a [`BackendLink`], a pair
//! of channels carrying JSON-RPC messages to and from the backend plus a
//! token that tears the link down. Sessions never see which transport they
//! run on.

mod custom;
mod http;
mod link;
mod sse;
mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcprouter_core::{BackendDefinition, TransportConfig, TransportType};

use crate::error::RouterResult;

pub use custom::{ConnectorRegistry, CustomConnector};
pub use http::HttpTransport;
pub use link::{BackendLink, LinkEvent};
pub use stdio::StdioTransport;

/// Transport trait for backend connections
///
/// Each implementation handles the specifics of reaching one backend using
/// a particular protocol. `connect` only opens the pipe; the MCP handshake
/// is performed by the session on top of the returned link.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> RouterResult<BackendLink>;

    fn transport_type(&self) -> TransportType;

    /// Description for logging
    fn description(&self) -> String;
}

/// Options shared by all transports
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// How long a closing child process gets before it is killed
    pub shutdown_grace: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    pub fn create(
        def: &BackendDefinition,
        connectors: &Arc<ConnectorRegistry>,
        options: &TransportOptions,
    ) -> Box<dyn Transport> {
        match &def.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => Box::new(StdioTransport::new(
                def.name.clone(),
                command.clone(),
                args.clone(),
                env.clone(),
                cwd.clone(),
                options.shutdown_grace,
            )),
            TransportConfig::Remote {
                url,
                headers,
                protocol,
            } => Box::new(HttpTransport::new(
                def.name.clone(),
                url.clone(),
                headers.clone(),
                *protocol,
                options.connect_timeout,
            )),
            TransportConfig::Custom { kind, config } => Box::new(custom::CustomTransport::new(
                def.name.clone(),
                kind.clone(),
                config.clone(),
                connectors.clone(),
            )),
        }
    }
}
