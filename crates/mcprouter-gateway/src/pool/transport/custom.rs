//! Opaque custom transports
//!
//! A `custom` backend carries an arbitrary JSON config and a `kind`. The
//! embedding application registers a [`CustomConnector`] for each kind it
//! supports; the router never interprets the config itself.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mcprouter_core::TransportType;
use serde_json::Value;
use tracing::info;

use super::{BackendLink, Transport};
use crate::error::{RouterError, RouterResult};

#[async_trait]
pub trait CustomConnector: Send + Sync {
    /// Open a link for `server` using its opaque `config`
    async fn connect(&self, server: &str, config: &Value) -> anyhow::Result<BackendLink>;
}

/// Connectors keyed by transport kind
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<dyn CustomConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the connector for `kind`
    pub fn register(&self, kind: impl Into<String>, connector: Arc<dyn CustomConnector>) {
        let kind = kind.into();
        info!(kind = %kind, "[ConnectorRegistry] Registered custom connector");
        self.connectors.insert(kind, connector);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn CustomConnector>> {
        self.connectors.get(kind).map(|c| c.value().clone())
    }

    pub fn kinds(&self) -> Vec<String> {
        self.connectors.iter().map(|e| e.key().clone()).collect()
    }
}

pub(super) struct CustomTransport {
    server: String,
    kind: String,
    config: Value,
    connectors: Arc<ConnectorRegistry>,
}

impl CustomTransport {
    pub(super) fn new(
        server: String,
        kind: String,
        config: Value,
        connectors: Arc<ConnectorRegistry>,
    ) -> Self {
        Self {
            server,
            kind,
            config,
            connectors,
        }
    }
}

#[async_trait]
impl Transport for CustomTransport {
    async fn connect(&self) -> RouterResult<BackendLink> {
        let connector = self.connectors.get(&self.kind).ok_or_else(|| {
            RouterError::transport(
                &self.server,
                format!("no connector registered for custom transport kind '{}'", self.kind),
            )
        })?;

        connector
            .connect(&self.server, &self.config)
            .await
            .map_err(|e| RouterError::transport(&self.server, format!("{:#}", e)))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Custom
    }

    fn description(&self) -> String {
        format!("custom:{}", self.kind)
    }
}
