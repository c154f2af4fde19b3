//! Router error taxonomy
//!
//! Every failure a frontend can observe is one of these variants. Transport
//! and protocol faults are recovered inside the owning session; what reaches
//! the caller is always attributable to a single backend (or to the caller's
//! own request).

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub type RouterResult<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// The backend session is not Ready. Retryable.
    #[error("Backend '{server}' is unavailable: {reason}")]
    BackendUnavailable { server: String, reason: String },

    /// The namespaced target does not resolve for this client
    #[error("Name not found: {name}")]
    NameNotFound { name: String },

    /// No reply within the per-request timeout; a cancellation was sent upstream
    #[error("Request '{method}' to backend '{server}' timed out after {after:?}")]
    Timeout {
        server: String,
        method: String,
        after: Duration,
    },

    /// The backend sent something that is not valid JSON-RPC
    #[error("Backend '{server}' protocol error: {reason}")]
    BackendProtocolError { server: String, reason: String },

    /// Startup retries were exhausted; waits for a configuration change
    #[error("Backend '{server}' failed to start after {attempts} attempts: {reason}")]
    PersistentConfigError {
        server: String,
        attempts: u32,
        reason: String,
    },

    /// The backend answered with a JSON-RPC error; passed through unchanged
    #[error("Backend '{server}' returned error {code}: {message}")]
    BackendError {
        server: String,
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// Two backends claim the same namespace alias
    #[error("Alias '{alias}' of backend '{rejected}' is already used by backend '{existing}'")]
    AliasConflict {
        alias: String,
        existing: String,
        rejected: String,
    },

    #[error("Invalid alias '{alias}' for backend '{server}': {reason}")]
    InvalidAlias {
        server: String,
        alias: String,
        reason: String,
    },

    /// The request was cancelled by the client or by shutdown
    #[error("Request cancelled: {reason}")]
    Cancelled { reason: String },

    /// The frontend request itself is unusable
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A transport could not be opened or failed mid-flight
    #[error("Transport error for backend '{server}': {reason}")]
    Transport { server: String, reason: String },
}

impl RouterError {
    pub fn unavailable(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NameNotFound { name: name.into() }
    }

    pub fn protocol(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendProtocolError {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case name for the variant, used in error `data`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::NameNotFound { .. } => "name_not_found",
            Self::Timeout { .. } => "timeout",
            Self::BackendProtocolError { .. } => "backend_protocol_error",
            Self::PersistentConfigError { .. } => "persistent_config_error",
            Self::BackendError { .. } => "backend_error",
            Self::AliasConflict { .. } => "alias_conflict",
            Self::InvalidAlias { .. } => "invalid_alias",
            Self::Cancelled { .. } => "cancelled",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Transport { .. } => "transport",
        }
    }

    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::Timeout { .. })
    }

    /// The backend this error is attributed to, if any
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::BackendUnavailable { server, .. }
            | Self::Timeout { server, .. }
            | Self::BackendProtocolError { server, .. }
            | Self::PersistentConfigError { server, .. }
            | Self::BackendError { server, .. }
            | Self::InvalidAlias { server, .. }
            | Self::Transport { server, .. } => Some(server),
            Self::AliasConflict { rejected, .. } => Some(rejected),
            Self::NameNotFound { .. } | Self::Cancelled { .. } | Self::InvalidRequest { .. } => {
                None
            }
        }
    }
}

/// Convert RouterError to rmcp::ErrorData for MCP protocol responses
///
/// | RouterError            | MCP Error Code       |
/// |------------------------|----------------------|
/// | NameNotFound           | INVALID_PARAMS       |
/// | InvalidRequest         | INVALID_PARAMS       |
/// | BackendError           | backend's own code   |
/// | everything else        | INTERNAL_ERROR       |
///
/// `data` always carries `{"kind": ..., "retryable": ...}`; backend errors
/// keep their original `data` under `"backend"`.
impl From<RouterError> for rmcp::ErrorData {
    fn from(err: RouterError) -> Self {
        use rmcp::model::{ErrorCode, ErrorData};

        let mut data = json!({
            "kind": err.kind(),
            "retryable": err.is_retryable(),
        });
        if let Some(server) = err.server() {
            data["server"] = json!(server);
        }

        let message = err.to_string();
        let code = match err {
            RouterError::NameNotFound { .. } | RouterError::InvalidRequest { .. } => {
                ErrorCode::INVALID_PARAMS
            }
            RouterError::BackendError {
                code,
                message,
                data: backend_data,
                ..
            } => {
                if let Some(backend_data) = backend_data {
                    data["backend"] = backend_data;
                }
                return ErrorData {
                    code: ErrorCode(code),
                    message: message.into(),
                    data: Some(data),
                };
            }
            _ => ErrorCode::INTERNAL_ERROR,
        };

        ErrorData {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}
