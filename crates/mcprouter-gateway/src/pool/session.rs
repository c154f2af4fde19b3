//! Backend session
//!
//! One `Session` is the single live connection to one backend. It owns the
//! table of outstanding backend requests (keyed by router-allocated request
//! id), runs the read loop that demultiplexes replies, answers backend
//! requests the router can serve itself, and reports anything that needs the
//! session manager's attention through a signal channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use mcprouter_core::CapabilityKind;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use super::protocol::{self, Incoming};
use super::transport::{BackendLink, LinkEvent};
use crate::error::{RouterError, RouterResult};

/// Upper bound on pages fetched for one list call
const MAX_LIST_PAGES: usize = 1000;

/// Receives progress notification params, already rewritten with the
/// caller's own progress token.
pub type ProgressSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Where to relay progress for one request
#[derive(Clone)]
pub struct ProgressRoute {
    /// The token the caller used
    pub token: Value,
    pub sink: ProgressSink,
}

/// Per-request options
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub progress: Option<ProgressRoute>,
    /// Cancelled by the caller (client cancel, client disconnect, shutdown)
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Things the session manager must react to
#[derive(Debug)]
pub enum SessionSignal {
    /// Refetch these capability lists
    ListChanged(&'static [CapabilityKind]),
    /// Transport or protocol failure; the session is no longer usable
    Failed(RouterError),
    /// `notifications/message` from the backend
    Log {
        level: String,
        logger: Option<String>,
        data: Value,
    },
}

struct PendingRequest {
    method: String,
    reply: oneshot::Sender<RouterResult<Value>>,
    progress: Option<ProgressRoute>,
}

struct PendingTable {
    accepting: bool,
    entries: HashMap<u64, PendingRequest>,
}

// ============================================================================
// Session tracker
// ============================================================================

/// Counts open sessions per backend name.
///
/// A session counts as live from the moment its link is attached until it
/// is closed or dropped.
#[derive(Default)]
pub struct SessionTracker {
    live: DashMap<String, usize>,
    peak: DashMap<String, usize>,
}

impl SessionTracker {
    fn opened(&self, server: &str) {
        let now = {
            let mut live = self.live.entry(server.to_string()).or_insert(0);
            *live += 1;
            *live
        };
        self.peak
            .entry(server.to_string())
            .and_modify(|p| *p = (*p).max(now))
            .or_insert(now);
    }

    fn closed(&self, server: &str) {
        if let Some(mut live) = self.live.get_mut(server) {
            *live = live.saturating_sub(1);
        }
    }

    /// Sessions currently open for `server`
    pub fn live(&self, server: &str) -> usize {
        self.live.get(server).map(|v| *v).unwrap_or(0)
    }

    /// Highest number of simultaneously open sessions ever seen for `server`
    pub fn peak(&self, server: &str) -> usize {
        self.peak.get(server).map(|v| *v).unwrap_or(0)
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    server: String,
    epoch: u64,
    outbound: mpsc::Sender<Value>,
    pending: Mutex<PendingTable>,
    /// Router-wide id allocator, so ids never repeat across sessions
    ids: Arc<AtomicU64>,
    drained: Notify,
    shutdown: CancellationToken,
    _shutdown_on_drop: DropGuard,
    initialize_result: RwLock<Value>,
    rejected_responses: AtomicU64,
    closed: AtomicBool,
    tracker: Arc<SessionTracker>,
}

impl Session {
    /// Attach a session to an open link and start its read loop
    pub fn open(
        server: &str,
        epoch: u64,
        link: BackendLink,
        ids: Arc<AtomicU64>,
        tracker: Arc<SessionTracker>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionSignal>) {
        let BackendLink {
            outbound,
            inbound,
            shutdown,
        } = link;

        tracker.opened(server);
        let session = Arc::new(Self {
            server: server.to_string(),
            epoch,
            outbound,
            pending: Mutex::new(PendingTable {
                accepting: true,
                entries: HashMap::new(),
            }),
            ids,
            drained: Notify::new(),
            _shutdown_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            initialize_result: RwLock::new(Value::Null),
            rejected_responses: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            tracker,
        });

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(Arc::downgrade(&session), inbound, signal_tx));

        (session, signal_rx)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of outstanding backend requests
    pub fn in_flight(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Replies whose id matched no outstanding request
    pub fn rejected_responses(&self) -> u64 {
        self.rejected_responses.load(Ordering::Relaxed)
    }

    /// The backend's `initialize` result
    pub fn initialize_result(&self) -> Value {
        self.initialize_result.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Allocate the backend request id for the next request
    pub fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub async fn request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> RouterResult<Value> {
        let id = self.next_id();
        self.request_with_id(id, method, params, options).await
    }

    /// Send a request under a pre-allocated id and wait for its reply.
    ///
    /// Dropping the returned future before it completes removes the
    /// outstanding entry and sends a best-effort cancellation upstream.
    pub async fn request_with_id(
        self: &Arc<Self>,
        id: u64,
        method: &str,
        mut params: Option<Value>,
        options: RequestOptions,
    ) -> RouterResult<Value> {
        let RequestOptions {
            timeout,
            progress,
            cancel,
        } = options;

        if progress.is_some() {
            protocol::set_progress_token(params.get_or_insert_with(|| json!({})), json!(id));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if !pending.accepting {
                return Err(RouterError::unavailable(&self.server, "session is closing"));
            }
            pending.entries.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    reply: reply_tx,
                    progress,
                },
            );
        }

        let mut guard = PendingGuard {
            session: self,
            id,
            reason: "request abandoned",
            armed: true,
        };

        if self
            .outbound
            .send(protocol::request(id, method, params))
            .await
            .is_err()
        {
            guard.remove_quietly();
            return Err(RouterError::unavailable(&self.server, "backend link closed"));
        }

        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            reply = reply_rx => {
                guard.armed = false;
                reply.unwrap_or_else(|_| {
                    Err(RouterError::unavailable(&self.server, "session closed"))
                })
            }
            _ = tokio::time::sleep(timeout) => {
                guard.reason = "timeout";
                drop(guard);
                warn!(
                    server = %self.server,
                    request_id = id,
                    method = %method,
                    ?timeout,
                    "[Session] Request timed out"
                );
                Err(RouterError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    after: timeout,
                })
            }
            _ = cancel.cancelled() => {
                guard.reason = "cancelled by client";
                drop(guard);
                Err(RouterError::Cancelled {
                    reason: format!("request to '{}' cancelled", self.server),
                })
            }
        }
    }

    /// Fire-and-forget notification to the backend
    pub async fn notify(&self, method: &str, params: Option<Value>) -> RouterResult<()> {
        self.outbound
            .send(protocol::notification(method, params))
            .await
            .map_err(|_| RouterError::unavailable(&self.server, "backend link closed"))
    }

    /// MCP handshake. Returns the backend's advertised capabilities.
    pub async fn initialize(self: &Arc<Self>, timeout: Duration) -> RouterResult<Value> {
        let params = json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": mcprouter_core::branding::APP_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self
            .request("initialize", Some(params), RequestOptions::with_timeout(timeout))
            .await?;

        if !result.is_object() {
            return Err(RouterError::protocol(
                &self.server,
                "initialize result is not an object",
            ));
        }
        let capabilities = result
            .get("capabilities")
            .cloned()
            .unwrap_or_else(|| json!({}));
        *self.initialize_result.write() = result;

        self.notify("notifications/initialized", None).await?;
        Ok(capabilities)
    }

    /// Fetch every page of one capability list
    pub async fn list_all(
        self: &Arc<Self>,
        kind: CapabilityKind,
        timeout: Duration,
    ) -> RouterResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self
                .request(kind.list_method(), params, RequestOptions::with_timeout(timeout))
                .await?;

            let page = result
                .get(kind.list_field())
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    RouterError::protocol(
                        &self.server,
                        format!("{} result has no '{}' array", kind.list_method(), kind.list_field()),
                    )
                })?;
            items.extend(page.iter().cloned());

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(items),
            }
        }

        warn!(
            server = %self.server,
            method = kind.list_method(),
            "[Session] Pagination limit reached, list truncated"
        );
        Ok(items)
    }

    /// Protocol-level liveness probe
    pub async fn ping(self: &Arc<Self>, timeout: Duration) -> RouterResult<()> {
        self.request("ping", None, RequestOptions::with_timeout(timeout))
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Drain / close
    // ------------------------------------------------------------------------

    /// Stop accepting new requests; outstanding ones continue
    pub fn begin_close(&self) {
        self.pending.lock().accepting = false;
    }

    /// Wait until no requests are outstanding or `deadline` passes.
    ///
    /// Returns `true` if the session drained completely.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.begin_close();
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            let notified = self.drained.notified();
            let remaining = self.in_flight();
            if remaining == 0 {
                return true;
            }
            debug!(
                server = %self.server,
                epoch = self.epoch,
                remaining,
                "[Session] Draining"
            );
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    /// Fail everything outstanding and tear down the link
    pub fn close(&self, reason: &str) {
        let abandoned: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.accepting = false;
            pending.entries.drain().map(|(_, p)| p).collect()
        };
        for request in abandoned {
            debug!(
                server = %self.server,
                method = %request.method,
                "[Session] Failing request on close"
            );
            let _ = request
                .reply
                .send(Err(RouterError::unavailable(&self.server, reason)));
        }
        self.drained.notify_waiters();
        self.shutdown.cancel();
        self.mark_closed();
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.tracker.closed(&self.server);
            info!(server = %self.server, epoch = self.epoch, "[Session] Closed");
        }
    }

    fn take_pending(&self, id: u64) -> Option<PendingRequest> {
        let (entry, empty) = {
            let mut pending = self.pending.lock();
            let entry = pending.entries.remove(&id);
            (entry, pending.entries.is_empty())
        };
        if empty {
            self.drained.notify_waiters();
        }
        entry
    }

    // ------------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------------

    fn handle_message(&self, msg: Value) -> Option<SessionSignal> {
        let incoming = match Incoming::classify(msg) {
            Ok(incoming) => incoming,
            Err(malformed) => {
                warn!(
                    server = %self.server,
                    reason = %malformed.reason,
                    "[Session] Malformed message from backend"
                );
                let error = RouterError::protocol(&self.server, malformed.reason);
                if let Some(request) = malformed
                    .id
                    .as_ref()
                    .and_then(Value::as_u64)
                    .and_then(|id| self.take_pending(id))
                {
                    let _ = request.reply.send(Err(error.clone()));
                }
                return Some(SessionSignal::Failed(error));
            }
        };

        match incoming {
            Incoming::Response { id, outcome } => {
                match id.as_u64().and_then(|id| self.take_pending(id)) {
                    Some(request) => {
                        let outcome = outcome.map_err(|e| RouterError::BackendError {
                            server: self.server.clone(),
                            code: e.code,
                            message: e.message,
                            data: e.data,
                        });
                        let _ = request.reply.send(outcome);
                    }
                    None => {
                        self.rejected_responses.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            server = %self.server,
                            epoch = self.epoch,
                            id = %id,
                            "[Session] Rejected response with unknown or stale id"
                        );
                    }
                }
                None
            }
            Incoming::Request { id, method, .. } => {
                let reply = if method == "ping" {
                    protocol::result_response(id, json!({}))
                } else {
                    debug!(server = %self.server, method = %method, "[Session] Unsupported backend request");
                    protocol::error_response(
                        id,
                        protocol::METHOD_NOT_FOUND,
                        format!("Method not supported by router: {}", method),
                    )
                };
                if self.outbound.try_send(reply).is_err() {
                    debug!(server = %self.server, "[Session] Could not answer backend request");
                }
                None
            }
            Incoming::Notification { method, params } => self.handle_notification(&method, params),
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) -> Option<SessionSignal> {
        if let Some(kinds) = CapabilityKind::from_list_changed(method) {
            info!(server = %self.server, method, "[Session] Backend list changed");
            return Some(SessionSignal::ListChanged(kinds));
        }

        match method {
            "notifications/progress" => {
                let params = params?;
                let id = protocol_progress_id(&params)?;
                let route = {
                    let pending = self.pending.lock();
                    pending.entries.get(&id).and_then(|p| p.progress.clone())
                };
                match route {
                    Some(route) => {
                        let mut forwarded = params;
                        forwarded["progressToken"] = route.token.clone();
                        (route.sink)(forwarded);
                    }
                    None => trace!(server = %self.server, id, "[Session] Progress for unknown request"),
                }
                None
            }
            "notifications/message" => {
                let params = params.unwrap_or_default();
                Some(SessionSignal::Log {
                    level: params
                        .get("level")
                        .and_then(Value::as_str)
                        .unwrap_or("info")
                        .to_string(),
                    logger: params
                        .get("logger")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    data: params.get("data").cloned().unwrap_or(Value::Null),
                })
            }
            _ => {
                trace!(server = %self.server, method, "[Session] Ignoring notification");
                None
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

fn protocol_progress_id(params: &Value) -> Option<u64> {
    params.get("progressToken").and_then(Value::as_u64)
}

/// Removes an outstanding request if its future is dropped early
struct PendingGuard<'a> {
    session: &'a Arc<Session>,
    id: u64,
    reason: &'static str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn remove_quietly(&mut self) {
        self.armed = false;
        self.session.take_pending(self.id);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.session.take_pending(self.id).is_some() {
            debug!(
                server = %self.session.server,
                request_id = self.id,
                reason = self.reason,
                "[Session] Cancelling backend request"
            );
            let _ = self
                .session
                .outbound
                .try_send(protocol::cancelled(self.id, self.reason));
        }
    }
}

async fn read_loop(
    session: Weak<Session>,
    mut inbound: mpsc::Receiver<LinkEvent>,
    signals: mpsc::UnboundedSender<SessionSignal>,
) {
    while let Some(event) = inbound.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        let signal = match event {
            LinkEvent::Message(msg) => session.handle_message(msg),
            LinkEvent::Malformed(reason) => {
                warn!(server = %session.server, reason = %reason, "[Session] Malformed line from backend");
                Some(SessionSignal::Failed(RouterError::protocol(&session.server, reason)))
            }
            LinkEvent::Closed(reason) => {
                if !session.is_closed() {
                    let _ = signals.send(SessionSignal::Failed(RouterError::transport(
                        &session.server,
                        format!("link closed: {}", reason),
                    )));
                }
                return;
            }
        };
        if let Some(signal) = signal {
            let _ = signals.send(signal);
        }
    }
}
