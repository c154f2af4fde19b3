//! JSON file profile store
//!
//! Server entries follow the standard MCP client format used by editors and
//! desktop clients: transport fields (`command`/`args`/`env` or
//! `url`/`headers`) sit at the top level of each entry, with no `transport`
//! wrapper.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ProfileStore;
use crate::{BackendDefinition, Profile, RemoteProtocol, RouterSnapshot, TransportConfig};

/// On-disk document shape
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProfilesDocument {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerEntry>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,
}

/// A single server entry in standard MCP client format
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerEntry {
    /// `"custom"` selects the opaque connector transport; `"sse"` or
    /// `"http"` pin the protocol of a `url` entry
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind_tag: Option<String>,

    // --- Stdio transport ---
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
    pub cwd: Option<PathBuf>,

    // --- Remote transport ---
    pub url: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,

    // --- Custom transport ---
    pub kind: Option<String>,
    pub config: Option<serde_json::Value>,

    // --- Common ---
    pub alias: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Profiles may be written as a bare list or as `{ "servers": [...] }`
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileEntry {
    List(Vec<String>),
    Object { servers: Vec<String> },
}

impl ProfileEntry {
    fn servers(&self) -> &[String] {
        match self {
            ProfileEntry::List(servers) => servers,
            ProfileEntry::Object { servers } => servers,
        }
    }
}

impl ServerEntry {
    fn to_transport(&self, name: &str) -> Result<TransportConfig> {
        if self.kind_tag.as_deref() == Some("custom") {
            let kind = self
                .kind
                .clone()
                .with_context(|| format!("Server '{}': custom transport requires 'kind'", name))?;
            return Ok(TransportConfig::Custom {
                kind,
                config: self.config.clone().unwrap_or(serde_json::Value::Null),
            });
        }

        match (&self.command, &self.url) {
            (Some(command), None) => Ok(TransportConfig::Stdio {
                command: command.clone(),
                args: self.args.clone().unwrap_or_default(),
                env: self.env.clone().unwrap_or_default(),
                cwd: self.cwd.clone(),
            }),
            (None, Some(url)) => Ok(TransportConfig::Remote {
                url: url.clone(),
                headers: self.headers.clone().unwrap_or_default(),
                protocol: self
                    .kind_tag
                    .as_deref()
                    .and_then(RemoteProtocol::from_entry_type)
                    .unwrap_or_default(),
            }),
            (Some(_), Some(_)) => {
                anyhow::bail!("Server '{}': both 'command' and 'url' are set", name)
            }
            (None, None) => {
                anyhow::bail!("Server '{}': one of 'command' or 'url' is required", name)
            }
        }
    }

    pub fn to_definition(&self, name: &str) -> Result<BackendDefinition> {
        Ok(BackendDefinition {
            name: name.to_string(),
            alias: self.alias.clone(),
            transport: self.to_transport(name)?,
            disabled: self.disabled,
        })
    }
}

impl ProfilesDocument {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid profile store document")
    }

    pub fn to_snapshot(&self) -> Result<RouterSnapshot> {
        let mut snapshot = RouterSnapshot::default();
        for (name, entry) in &self.servers {
            snapshot = snapshot.with_server(entry.to_definition(name)?);
        }
        for (name, entry) in &self.profiles {
            snapshot = snapshot.with_profile(Profile::new(name.clone(), entry.servers().to_vec()));
        }
        Ok(snapshot)
    }
}

/// Profile store backed by a JSON document on disk.
///
/// A missing file is an empty store, not an error.
pub struct JsonFileProfileStore {
    path: PathBuf,
}

impl JsonFileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProfileStore for JsonFileProfileStore {
    async fn load(&self) -> Result<RouterSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "[ProfileStore] File missing, using empty store");
                return Ok(RouterSnapshot::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        ProfilesDocument::parse(&raw)
            .and_then(|doc| doc.to_snapshot())
            .with_context(|| format!("Failed to load profiles from {}", self.path.display()))
    }

    fn watch_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
