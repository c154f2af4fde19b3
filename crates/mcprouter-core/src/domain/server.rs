//! Backend server definitions
//!
//! A `BackendDefinition` is the desired-state description of one backend MCP
//! server as read from the Profile Store. Runtime state (connection status,
//! capabilities) lives in the gateway's session manager, never here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Desired configuration for one backend MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDefinition {
    /// Unique server name (key in the profile store)
    pub name: String,

    /// Optional short alias used as the namespace prefix; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// How to reach the server
    pub transport: TransportConfig,

    /// Disabled servers are never started, even when a profile references them
    #[serde(default)]
    pub disabled: bool,
}

impl BackendDefinition {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            alias: None,
            transport,
            disabled: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The namespace prefix for this server's capabilities
    pub fn effective_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Description for logging (never includes header values or env values)
    pub fn describe(&self) -> String {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => format!("stdio:{}", command),
            TransportConfig::Remote {
                url,
                protocol: RemoteProtocol::Sse,
                ..
            } => format!("sse:{}", url),
            TransportConfig::Remote { url, .. } => format!("remote:{}", url),
            TransportConfig::Custom { kind, .. } => format!("custom:{}", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Remote,
    Custom,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Stdio => write!(f, "stdio"),
            TransportType::Remote => write!(f, "remote"),
            TransportType::Custom => write!(f, "custom"),
        }
    }
}

/// Wire protocol of a remote backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProtocol {
    /// Streamable HTTP, falling back to legacy SSE when the server rejects
    /// the initialize POST with a 4xx
    #[default]
    Auto,
    StreamableHttp,
    /// `GET` an event stream, read its `endpoint` event, POST messages there
    Sse,
}

impl RemoteProtocol {
    pub fn is_auto(&self) -> bool {
        matches!(self, RemoteProtocol::Auto)
    }

    /// Map the `type` field of a standard MCP client entry
    pub fn from_entry_type(tag: &str) -> Option<Self> {
        match tag {
            "sse" => Some(RemoteProtocol::Sse),
            "http" | "streamable-http" | "streamable_http" | "streamableHttp" => {
                Some(RemoteProtocol::StreamableHttp)
            }
            _ => None,
        }
    }
}

/// Transport descriptor for a backend server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// MCP endpoint over HTTP, streamable or legacy SSE
    Remote {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "RemoteProtocol::is_auto")]
        protocol: RemoteProtocol,
    },
    /// Opaque configuration handed to a connector registered under `kind`
    Custom {
        kind: String,
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl TransportConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        TransportConfig::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        TransportConfig::Remote {
            url: url.into(),
            headers: BTreeMap::new(),
            protocol: RemoteProtocol::Auto,
        }
    }

    pub fn custom(kind: impl Into<String>, config: serde_json::Value) -> Self {
        TransportConfig::Custom {
            kind: kind.into(),
            config,
        }
    }

    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportConfig::Stdio { .. } => TransportType::Stdio,
            TransportConfig::Remote { .. } => TransportType::Remote,
            TransportConfig::Custom { .. } => TransportType::Custom,
        }
    }
}
