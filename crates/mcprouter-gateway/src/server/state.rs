//! Gateway state
//!
//! The services every client session shares. Built once by `RouterServer`
//! and handed to each `RouterHandler`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mcprouter_core::SharedEventBus;
use serde::Serialize;

use crate::consumers::MCPNotifier;
use crate::pool::{BackendStatus, Dispatcher, SessionManager};
use crate::services::ProfileResolverService;

pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<MCPNotifier>,
    pub profiles: Arc<ProfileResolverService>,
    pub event_bus: SharedEventBus,
    pub namespace_separator: String,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn sessions(&self) -> &SessionManager {
        self.dispatcher.sessions()
    }

    pub fn health(&self) -> HealthReport {
        let backends = self.sessions().statuses();
        let ready = backends
            .iter()
            .filter(|b| b.state.accepts_requests())
            .count();
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            clients: self.notifier.client_count(),
            in_flight: self.dispatcher.correlations().len(),
            ready_backends: ready,
            profiles: self.profiles.names(),
            backends,
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub clients: usize,
    pub in_flight: usize,
    pub ready_backends: usize,
    pub profiles: Vec<String>,
    pub backends: Vec<BackendStatus>,
}
