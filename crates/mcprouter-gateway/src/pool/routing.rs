//! Dispatcher - routes frontend requests to backend sessions
//!
//! For each request:
//! - resolve the exposed name (unresolved or outside the profile: `NameNotFound`)
//! - pick the Ready session (otherwise `BackendUnavailable`)
//! - record a correlation entry, strip the namespace, forward, await the reply
//!
//! Replies are matched by backend request id inside the session, never by
//! arrival order, so any number of requests may be in flight per backend.

use std::sync::Arc;
use std::time::Instant;

use mcprouter_core::CapabilityKind;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::correlation::{CorrelationEntry, CorrelationTable};
use super::server_manager::SessionManager;
use super::session::{ProgressRoute, RequestOptions};
use crate::error::{RouterError, RouterResult};

/// Where inside `params` the namespaced target lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    /// `params.name` (tools/call, prompts/get)
    Name,
    /// `params.uri` (resources/read, subscribe)
    Uri,
    /// `params.ref.name` (completion against a prompt)
    RefName,
    /// `params.ref.uri` (completion against a resource template)
    RefUri,
}

impl TargetField {
    fn pointer(&self) -> &'static str {
        match self {
            Self::Name => "/name",
            Self::Uri => "/uri",
            Self::RefName => "/ref/name",
            Self::RefUri => "/ref/uri",
        }
    }
}

/// Identity of the calling frontend client
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub client: String,
    /// Backends the client's profile may reach, in profile order
    pub allowed: Arc<Vec<String>>,
}

/// One request to route
pub struct DispatchRequest {
    pub caller: CallerContext,
    /// Frontend request id, unique per client while outstanding
    pub request_id: String,
    pub kind: CapabilityKind,
    pub method: &'static str,
    pub params: Value,
    pub target: TargetField,
    pub progress: Option<ProgressRoute>,
}

pub struct Dispatcher {
    sessions: SessionManager,
    correlations: Arc<CorrelationTable>,
}

impl Dispatcher {
    pub fn new(sessions: SessionManager, correlations: Arc<CorrelationTable>) -> Self {
        Self {
            sessions,
            correlations,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.correlations
    }

    /// Namespaced catalog of one kind visible to a caller
    pub fn catalog(&self, kind: CapabilityKind, caller: &CallerContext) -> Vec<Value> {
        self.sessions.aggregator().list(kind, &caller.allowed)
    }

    /// Route one request and wait for the backend's reply.
    ///
    /// `cancel` fires when the client cancels the request or goes away.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> RouterResult<Value> {
        let DispatchRequest {
            caller,
            request_id,
            kind,
            method,
            mut params,
            target,
            progress,
        } = request;

        let exposed = params
            .pointer(target.pointer())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RouterError::InvalidRequest {
                reason: format!("missing '{}' in {} params", target.pointer(), method),
            })?;

        let resolved = self
            .sessions
            .aggregator()
            .resolve(kind, &exposed, &caller.allowed)?;

        let session = match self.sessions.ready_session(&resolved.server) {
            Ok(session) => session,
            Err(RouterError::PersistentConfigError { .. }) => {
                debug!(server = %resolved.server, name = %exposed, "[Dispatcher] Backend in persistent error");
                return Err(RouterError::not_found(exposed));
            }
            Err(err) => return Err(err),
        };

        if let Some(slot) = params.pointer_mut(target.pointer()) {
            *slot = Value::String(resolved.original.clone());
        }

        let backend_request_id = session.next_id();
        let request_cancel = cancel.child_token();
        self.correlations.insert(
            &caller.client,
            &request_id,
            CorrelationEntry {
                server: resolved.server.clone(),
                epoch: session.epoch(),
                backend_request_id,
                method: method.to_string(),
                started: Instant::now(),
                cancel: request_cancel.clone(),
            },
        )?;
        let _correlation = CorrelationGuard {
            table: &self.correlations,
            client: &caller.client,
            request_id: &request_id,
        };

        debug!(
            client = %caller.client,
            request_id = %request_id,
            server = %resolved.server,
            epoch = session.epoch(),
            backend_request_id,
            method,
            name = %resolved.original,
            "[Dispatcher] Forwarding"
        );

        let started = Instant::now();
        let result = session
            .request_with_id(
                backend_request_id,
                method,
                Some(params),
                RequestOptions {
                    timeout: self.sessions.config().request_timeout,
                    progress,
                    cancel: Some(request_cancel),
                },
            )
            .await;

        match &result {
            Ok(_) => debug!(
                server = %resolved.server,
                method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "[Dispatcher] Completed"
            ),
            Err(RouterError::Cancelled { .. }) => info!(
                client = %caller.client,
                request_id = %request_id,
                server = %resolved.server,
                "[Dispatcher] Cancelled by client"
            ),
            Err(err) => warn!(
                server = %resolved.server,
                method,
                error = %err,
                "[Dispatcher] Failed"
            ),
        }
        result
    }

    /// Route `completion/complete` by the kind of its `ref`
    pub async fn complete(
        &self,
        caller: CallerContext,
        request_id: String,
        params: Value,
        cancel: CancellationToken,
    ) -> RouterResult<Value> {
        let (kind, target) = match params.pointer("/ref/type").and_then(Value::as_str) {
            Some("ref/prompt") => (CapabilityKind::Prompt, TargetField::RefName),
            Some("ref/resource") => (CapabilityKind::Resource, TargetField::RefUri),
            other => {
                return Err(RouterError::InvalidRequest {
                    reason: format!("unsupported completion ref type {:?}", other),
                })
            }
        };
        self.dispatch(
            DispatchRequest {
                caller,
                request_id,
                kind,
                method: "completion/complete",
                params,
                target,
                progress: None,
            },
            cancel,
        )
        .await
    }

    /// Cancel every outstanding request of a departing client
    pub fn cancel_client(&self, client: &str) -> usize {
        self.correlations.cancel_client(client)
    }
}

struct CorrelationGuard<'a> {
    table: &'a CorrelationTable,
    client: &'a str,
    request_id: &'a str,
}

impl Drop for CorrelationGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.client, self.request_id);
    }
}
