//! Centralized branding constants
//!
//! All product naming and well-known defaults come from this module.

/// Product name used in logs, the MCP handshake and the CLI
pub const APP_NAME: &str = "mcprouter";

/// Human readable product name
pub const DISPLAY_NAME: &str = "McpRouter";

/// Default port for the HTTP frontend
pub const DEFAULT_GATEWAY_PORT: u16 = 45819;

/// Prefix for rolling log files (`mcprouter.2026-01-22.log`)
pub const LOG_PREFIX: &str = "mcprouter";

/// HTTP header a frontend client may use to select its profile
pub const PROFILE_HEADER: &str = "x-mcprouter-profile";

/// Query parameter a frontend client may use to select its profile
pub const PROFILE_QUERY_PARAM: &str = "profile";

/// Name of the profile used when a client does not ask for one
pub const DEFAULT_PROFILE: &str = "default";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MCPROUTER_";

/// Default location of the profile store (`~/.config/mcprouter/profiles.json`)
pub fn default_profiles_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(APP_NAME)
        .join("profiles.json")
}

/// Default directory for rolling log files
pub fn default_logs_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(APP_NAME)
        .join("logs")
}
