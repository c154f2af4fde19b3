//! STDIO transport for backend MCP servers
//!
//! Spawns the server as a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is forwarded to tracing.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use mcprouter_core::TransportType;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{BackendLink, Transport};
use crate::error::{RouterError, RouterResult};

/// STDIO transport for child process MCP servers
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    shutdown_grace: Duration,
}

impl StdioTransport {
    pub fn new(
        server: String,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<PathBuf>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            server,
            command,
            args,
            env,
            cwd,
            shutdown_grace,
        }
    }
}

impl StdioTransport {
    /// Find the executable the way the child will see it: `PATH` from the
    /// definition's env when set, relative paths against its `cwd`.
    fn resolve_command(&self) -> RouterResult<PathBuf> {
        let search_path = self
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"));
        let cwd = match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(|e| {
                RouterError::transport(&self.server, format!("No working directory: {}", e))
            })?,
        };

        let exe = format!("{}.exe", self.command);
        which::which_in(&self.command, search_path.as_ref(), &cwd)
            .or_else(|_| which::which_in(&exe, search_path.as_ref(), &cwd))
            .map_err(|_| {
                let err = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    self.command
                );
                error!(server = %self.server, "{}", err);
                RouterError::transport(&self.server, err)
            })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> RouterResult<BackendLink> {
        info!(
            server = %self.server,
            command = %self.command,
            "[StdioTransport] Spawning backend"
        );

        let command_path = self.resolve_command()?;

        debug!(server = %self.server, path = ?command_path, "[StdioTransport] Found command");

        let mut cmd = Command::new(&command_path);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            let err = format!("Failed to spawn process: {}", e);
            error!(server = %self.server, "{}", err);
            RouterError::transport(&self.server, err)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RouterError::transport(&self.server, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RouterError::transport(&self.server, "child stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "[stderr] {}", line);
                }
            });
        }

        let link = BackendLink::from_io(&self.server, stdout, stdin);

        // Reap the child: on shutdown give it a grace period after stdin
        // closes, then kill.
        let shutdown = link.shutdown.clone();
        let server = self.server.clone();
        let grace = self.shutdown_grace;
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(server = %server, %status, "[StdioTransport] Backend exited"),
                        Err(e) => warn!(server = %server, error = %e, "[StdioTransport] Wait failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(_) => debug!(server = %server, "[StdioTransport] Backend exited after stdin closed"),
                        Err(_) => {
                            warn!(server = %server, "[StdioTransport] Backend did not exit, killing");
                            let _ = child.kill().await;
                        }
                    }
                }
            }
        });

        Ok(link)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}
