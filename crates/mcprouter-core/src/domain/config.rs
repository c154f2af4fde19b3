//! Router runtime configuration
//!
//! Loaded from an optional JSON file, then overridden from `MCPROUTER_*`
//! environment variables. Every field has a default so an empty file (or no
//! file at all) is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::branding;

/// What a client's outbound queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Block the notification source for at most `max_wait_ms`, then drop
    Block { max_wait_ms: u64 },
    /// Evict the oldest low-priority notification
    DropOldest,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    // --- Frontend ---
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Profile for clients that do not name one
    pub default_profile: String,
    /// Location of the JSON profile store
    pub profiles_path: PathBuf,

    // --- Namespacing ---
    pub namespace_separator: String,

    // --- Backend sessions ---
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub startup_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_failure_threshold: u32,
    pub drain_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Grace period before a closing child process is killed
    pub shutdown_grace_ms: u64,

    // --- Frontend queues ---
    pub client_queue_capacity: usize,
    pub backpressure: BackpressurePolicy,

    // --- Config watcher ---
    pub watch_interval_ms: u64,
    pub watch_debounce_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: branding::DEFAULT_GATEWAY_PORT,
            enable_cors: true,
            default_profile: branding::DEFAULT_PROFILE.to_string(),
            profiles_path: branding::default_profiles_path(),
            namespace_separator: ":".to_string(),
            request_timeout_ms: 60_000,
            connect_timeout_ms: 30_000,
            startup_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            probe_interval_ms: 30_000,
            probe_timeout_ms: 10_000,
            probe_failure_threshold: 3,
            drain_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
            client_queue_capacity: 64,
            backpressure: BackpressurePolicy::DropOldest,
            watch_interval_ms: 5_000,
            watch_debounce_ms: 500,
        }
    }
}

impl RouterConfig {
    /// Load from an optional JSON file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str::<RouterConfig>(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => RouterConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MCPROUTER_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", branding::ENV_PREFIX, key)).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid {}PORT: {}", branding::ENV_PREFIX, port))?;
        }
        if let Some(path) = lookup("PROFILES") {
            self.profiles_path = PathBuf::from(path);
        }
        if let Some(profile) = lookup("DEFAULT_PROFILE") {
            self.default_profile = profile;
        }
        if let Some(timeout) = lookup("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = timeout.parse().with_context(|| {
                format!("Invalid {}REQUEST_TIMEOUT_MS: {}", branding::ENV_PREFIX, timeout)
            })?;
        }
        Ok(())
    }

    /// Reject configurations the router cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace_separator.is_empty() {
            anyhow::bail!("namespace_separator must not be empty");
        }
        if self.startup_attempts == 0 {
            anyhow::bail!("startup_attempts must be at least 1");
        }
        if self.probe_failure_threshold == 0 {
            anyhow::bail!("probe_failure_threshold must be at least 1");
        }
        if self.client_queue_capacity == 0 {
            anyhow::bail!("client_queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Socket address string for the HTTP frontend
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
