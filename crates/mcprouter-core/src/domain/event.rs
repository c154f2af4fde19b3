//! Domain Events - Unified event system for McpRouter
//!
//! All runtime changes the router cares about are represented as events in
//! this module. Events are emitted by the session manager, the capability
//! aggregator and the config watcher, and consumed by the MCP notifier and by
//! anything embedding the router.
//!
//! # Serialization
//!
//! Events serialize with a `type` field containing the snake_case variant name:
//! ```json
//! { "type": "backend_state_changed", "server": "fs", "state": "ready", "epoch": 3 }
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// SESSION STATE
// ============================================================================

/// Lifecycle state of a backend session.
///
/// ```text
/// Disconnected ─► Connecting ─► Ready ─► Degraded ─► Connecting ...
///      ▲              │           │          │
///      │              ▼           ▼          ▼
///      └──────── (retries)     Closing ◄─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closing => "closing",
        }
    }

    /// Only Ready sessions accept dispatches
    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CAPABILITY KINDS
// ============================================================================

/// The kinds of capability a backend can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
    ResourceTemplate,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tool,
        CapabilityKind::Prompt,
        CapabilityKind::Resource,
        CapabilityKind::ResourceTemplate,
    ];

    /// The backend list method for this kind
    pub fn list_method(&self) -> &'static str {
        match self {
            Self::Tool => "tools/list",
            Self::Prompt => "prompts/list",
            Self::Resource => "resources/list",
            Self::ResourceTemplate => "resources/templates/list",
        }
    }

    /// Field holding the items in the list result
    pub fn list_field(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Prompt => "prompts",
            Self::Resource => "resources",
            Self::ResourceTemplate => "resourceTemplates",
        }
    }

    /// Field holding the namespaced key inside one descriptor
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Tool | Self::Prompt => "name",
            Self::Resource => "uri",
            Self::ResourceTemplate => "uriTemplate",
        }
    }

    /// Capability key advertised in the `initialize` result
    pub fn capability_field(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Prompt => "prompts",
            Self::Resource | Self::ResourceTemplate => "resources",
        }
    }

    /// Kind refreshed by a backend `notifications/*/list_changed`
    pub fn from_list_changed(method: &str) -> Option<&'static [CapabilityKind]> {
        match method {
            "notifications/tools/list_changed" => Some(&[CapabilityKind::Tool]),
            "notifications/prompts/list_changed" => Some(&[CapabilityKind::Prompt]),
            "notifications/resources/list_changed" => {
                Some(&[CapabilityKind::Resource, CapabilityKind::ResourceTemplate])
            }
            _ => None,
        }
    }
}

// ============================================================================
// DOMAIN EVENTS
// ============================================================================

/// Unified domain event enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    // ════════════════════════════════════════════════════════════════════════
    // BACKEND LIFECYCLE
    // ════════════════════════════════════════════════════════════════════════
    /// A backend session moved to a new state
    BackendStateChanged {
        server: String,
        state: SessionState,
        epoch: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Startup retries were exhausted; reported once per configuration
    BackendFailed {
        server: String,
        attempts: u32,
        error: String,
    },

    /// A backend sent a `notifications/message` log entry
    BackendLog {
        server: String,
        level: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        logger: Option<String>,
        data: serde_json::Value,
    },

    // ════════════════════════════════════════════════════════════════════════
    // CATALOG
    // ════════════════════════════════════════════════════════════════════════
    /// One backend's contribution to the aggregate catalog changed
    CatalogChanged {
        server: String,
        kinds: Vec<CapabilityKind>,
        /// Monotonic per-aggregator sequence number
        seq: u64,
    },

    // ════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ════════════════════════════════════════════════════════════════════════
    /// The config watcher applied a new desired state
    ProfilesReloaded {
        profiles: Vec<String>,
        started: Vec<String>,
        updated: Vec<String>,
        stopped: Vec<String>,
    },

    // ════════════════════════════════════════════════════════════════════════
    // FRONTEND
    // ════════════════════════════════════════════════════════════════════════
    ClientConnected {
        client_id: String,
        profile: String,
    },

    ClientDisconnected {
        client_id: String,
    },

    GatewayStarted {
        url: String,
        port: u16,
    },

    GatewayStopped,
}

impl DomainEvent {
    /// Get the event type name (for logging/filtering)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BackendStateChanged { .. } => "backend_state_changed",
            Self::BackendFailed { .. } => "backend_failed",
            Self::BackendLog { .. } => "backend_log",
            Self::CatalogChanged { .. } => "catalog_changed",
            Self::ProfilesReloaded { .. } => "profiles_reloaded",
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::GatewayStarted { .. } => "gateway_started",
            Self::GatewayStopped => "gateway_stopped",
        }
    }

    /// The backend server this event concerns, if any
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::BackendStateChanged { server, .. }
            | Self::BackendFailed { server, .. }
            | Self::BackendLog { server, .. }
            | Self::CatalogChanged { server, .. } => Some(server),
            _ => None,
        }
    }

    /// Whether this event should trigger `list_changed` notifications
    pub fn changes_catalog(&self) -> bool {
        matches!(self, Self::CatalogChanged { .. })
    }
}
