//! SessionManager - owns the one live session per configured backend
//!
//! State machine per backend:
//! - `Disconnected -> Connecting -> Ready`
//! - `Ready -> Degraded` on transport/protocol failure or failed probes,
//!   then back to `Connecting` after backoff
//! - `Connecting -> Disconnected` once startup retries are exhausted
//!   (persistent error, reported once)
//! - `* -> Closing -> Disconnected` on removal
//!
//! Race prevention:
//! - start/stop for one name are serialized by a per-name async lock
//! - each connection attempt gets a fresh, router-wide epoch
//! - a backend has at most one supervisor task, and a supervisor holds at
//!   most one session at a time

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use mcprouter_core::{
    BackendDefinition, CapabilityKind, DomainEvent, EventSender, RouterConfig, SessionState,
    TransportType,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::features::CapabilityAggregator;
use super::protocol;
use super::session::{Session, SessionSignal, SessionTracker};
use super::transport::{ConnectorRegistry, TransportFactory, TransportOptions};
use crate::error::{RouterError, RouterResult};

/// Tunables for backend sessions
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub startup_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_failure_threshold: u32,
    pub drain_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl From<&RouterConfig> for SessionManagerConfig {
    fn from(config: &RouterConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
            startup_attempts: config.startup_attempts,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
            probe_failure_threshold: config.probe_failure_threshold.max(1),
            drain_timeout: config.drain_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

/// What `start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new backend was started
    Started,
    /// Same definition and healthy; nothing to do
    Unchanged,
    /// Definition changed: stopped gracefully and started again
    Updated,
    /// Same definition but in persistent error: tried again
    Retried,
    /// The definition is disabled; any running session was stopped
    Disabled,
}

/// Point-in-time view of one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub alias: String,
    pub transport: TransportType,
    pub state: SessionState,
    pub epoch: u64,
    /// Consecutive failed connection attempts
    pub attempts: u32,
    pub last_error: Option<String>,
    pub persistent_error: Option<String>,
    pub in_flight: usize,
    pub rejected_responses: u64,
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    pub resource_templates: usize,
    pub since: DateTime<Utc>,
}

/// Runtime state (in-memory only)
struct Runtime {
    state: SessionState,
    epoch: u64,
    attempts: u32,
    last_error: Option<String>,
    persistent_error: Option<RouterError>,
    since: DateTime<Utc>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct BackendEntry {
    definition: BackendDefinition,
    runtime: RwLock<Runtime>,
    session: RwLock<Option<Arc<Session>>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl BackendEntry {
    fn new(definition: BackendDefinition) -> Self {
        Self {
            definition,
            runtime: RwLock::new(Runtime {
                state: SessionState::Disconnected,
                epoch: 0,
                attempts: 0,
                last_error: None,
                persistent_error: None,
                since: Utc::now(),
            }),
            session: RwLock::new(None),
            supervisor: Mutex::new(None),
        }
    }

    fn name(&self) -> &str {
        &self.definition.name
    }
}

/// How a Ready session ended
enum SessionEnd {
    Cancelled,
    Failed(RouterError),
}

struct ManagerInner {
    config: SessionManagerConfig,
    entries: DashMap<String, Arc<BackendEntry>>,
    /// Per-name operation locks; outlive their entries
    op_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    aggregator: Arc<CapabilityAggregator>,
    connectors: Arc<ConnectorRegistry>,
    events: EventSender,
    request_ids: Arc<AtomicU64>,
    epochs: AtomicU64,
    tracker: Arc<SessionTracker>,
    accepting: AtomicBool,
}

/// Central owner of backend sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        aggregator: Arc<CapabilityAggregator>,
        connectors: Arc<ConnectorRegistry>,
        events: EventSender,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                entries: DashMap::new(),
                op_locks: DashMap::new(),
                aggregator,
                connectors,
                events,
                request_ids: Arc::new(AtomicU64::new(1)),
                epochs: AtomicU64::new(0),
                tracker: Arc::new(SessionTracker::default()),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.inner.config
    }

    pub fn aggregator(&self) -> &Arc<CapabilityAggregator> {
        &self.inner.aggregator
    }

    pub fn connectors(&self) -> &Arc<ConnectorRegistry> {
        &self.inner.connectors
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Start (or update) a backend. Idempotent for an unchanged definition.
    pub async fn start(&self, definition: BackendDefinition) -> RouterResult<StartOutcome> {
        let name = definition.name.clone();
        let lock = self.inner.op_lock(&name);
        let _op = lock.lock().await;

        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(RouterError::unavailable(&name, "router is shutting down"));
        }

        let existing = self.inner.entries.get(&name).map(|e| e.value().clone());

        if definition.disabled {
            if existing.is_some() {
                self.inner.stop_locked(&name, "backend disabled").await;
            }
            return Ok(StartOutcome::Disabled);
        }

        let outcome = match existing {
            None => StartOutcome::Started,
            Some(entry) => {
                let persistent = entry.runtime.read().persistent_error.is_some();
                if entry.definition == definition && !persistent {
                    trace!(server = %name, "[SessionManager] start: unchanged");
                    return Ok(StartOutcome::Unchanged);
                }
                let (outcome, reason) = if entry.definition == definition {
                    (StartOutcome::Retried, "retrying after persistent error")
                } else {
                    (StartOutcome::Updated, "definition changed")
                };
                self.inner.stop_locked(&name, reason).await;
                outcome
            }
        };

        self.inner.start_locked(definition)?;
        Ok(outcome)
    }

    /// Gracefully remove a backend. Returns false if it was not running.
    pub async fn stop(&self, name: &str) -> bool {
        let lock = self.inner.op_lock(name);
        let _op = lock.lock().await;
        self.inner.stop_locked(name, "backend removed").await
    }

    /// Stop accepting new sessions, drain everything up to `deadline`,
    /// then force-close whatever is left.
    pub async fn shutdown(&self, deadline: Duration) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let names = self.names();
        info!(
            backends = names.len(),
            ?deadline,
            "[SessionManager] Shutting down"
        );

        let stops = names.iter().map(|name| self.stop(name));
        if tokio::time::timeout(deadline, join_all(stops)).await.is_err() {
            warn!("[SessionManager] Shutdown deadline reached, force-closing sessions");
        }

        let remaining: Vec<Arc<BackendEntry>> =
            self.inner.entries.iter().map(|e| e.value().clone()).collect();
        for entry in remaining {
            self.inner.force_close(&entry);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn definition(&self, name: &str) -> Option<BackendDefinition> {
        self.inner.entries.get(name).map(|e| e.definition.clone())
    }

    pub fn state(&self, name: &str) -> Option<SessionState> {
        self.inner.entries.get(name).map(|e| e.runtime.read().state)
    }

    pub fn status(&self, name: &str) -> Option<BackendStatus> {
        let entry = self.inner.entries.get(name)?.value().clone();
        Some(self.inner.status_of(&entry))
    }

    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.names().iter().filter_map(|n| self.status(n)).collect()
    }

    /// The session to dispatch on, if the backend is Ready
    pub fn ready_session(&self, name: &str) -> RouterResult<Arc<Session>> {
        let entry = self
            .inner
            .entries
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| RouterError::unavailable(name, "backend is not running"))?;

        {
            let runtime = entry.runtime.read();
            if let Some(err) = &runtime.persistent_error {
                return Err(err.clone());
            }
            if !runtime.state.accepts_requests() {
                return Err(RouterError::unavailable(
                    name,
                    format!("session is {}", runtime.state),
                ));
            }
        }

        let session = entry.session.read().clone();
        session
            .filter(|s| !s.is_closed())
            .ok_or_else(|| RouterError::unavailable(name, "no live session"))
    }

    /// Sessions currently open for `name`
    pub fn live_session_count(&self, name: &str) -> usize {
        self.inner.tracker.live(name)
    }

    /// Most sessions ever open at once for `name`
    pub fn peak_live_sessions(&self, name: &str) -> usize {
        self.inner.tracker.peak(name)
    }
}

impl ManagerInner {
    fn op_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.op_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn start_locked(self: &Arc<Self>, definition: BackendDefinition) -> RouterResult<()> {
        let name = definition.name.clone();
        let alias = definition.effective_alias().to_string();

        if let Err(err) = self.aggregator.register_alias(&name, &alias) {
            warn!(server = %name, alias = %alias, error = %err, "[SessionManager] Backend rejected");
            return Err(err);
        }

        let entry = Arc::new(BackendEntry::new(definition));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.clone(), entry.clone(), cancel.clone()));
        *entry.supervisor.lock() = Some(Supervisor { cancel, handle });

        info!(
            server = %name,
            alias = %alias,
            transport = %entry.definition.describe(),
            "[SessionManager] Backend started"
        );
        self.entries.insert(name, entry);
        Ok(())
    }

    async fn stop_locked(&self, name: &str, reason: &str) -> bool {
        let Some(entry) = self.entries.get(name).map(|e| e.value().clone()) else {
            return false;
        };

        let epoch = entry.runtime.read().epoch;
        self.set_state(&entry, SessionState::Closing, epoch, Some(reason.to_string()));
        self.aggregator.withdraw(name);

        let session = entry.session.read().clone();
        if let Some(session) = &session {
            session.begin_close();
        }

        let supervisor = entry.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            supervisor.cancel.cancel();
            if let Err(e) = supervisor.handle.await {
                error!(server = %name, error = %e, "[SessionManager] Supervisor task failed");
            }
        }

        if let Some(session) = session {
            let remaining = session.in_flight();
            if remaining > 0 {
                info!(
                    server = %name,
                    in_flight = remaining,
                    "[SessionManager] Draining before close"
                );
            }
            if !session.drain(self.config.drain_timeout).await {
                warn!(
                    server = %name,
                    abandoned = session.in_flight(),
                    "[SessionManager] Drain timed out"
                );
            }
            session.close(reason);
        }
        entry.session.write().take();

        self.set_state(&entry, SessionState::Disconnected, epoch, Some(reason.to_string()));
        self.aggregator.release_alias(name);
        self.entries.remove(name);
        info!(server = %name, reason = %reason, "[SessionManager] Backend stopped");
        true
    }

    fn force_close(&self, entry: &Arc<BackendEntry>) {
        let name = entry.name().to_string();
        if let Some(supervisor) = entry.supervisor.lock().take() {
            supervisor.cancel.cancel();
            supervisor.handle.abort();
        }
        if let Some(session) = entry.session.write().take() {
            session.close("router shutdown");
        }
        self.aggregator.withdraw(&name);
        self.aggregator.release_alias(&name);
        let epoch = entry.runtime.read().epoch;
        self.set_state(entry, SessionState::Disconnected, epoch, Some("forced".to_string()));
        self.entries.remove(&name);
    }

    fn set_state(
        &self,
        entry: &BackendEntry,
        state: SessionState,
        epoch: u64,
        message: Option<String>,
    ) {
        {
            let mut runtime = entry.runtime.write();
            if runtime.state == state && runtime.epoch == epoch {
                return;
            }
            runtime.state = state;
            runtime.epoch = epoch;
            runtime.since = Utc::now();
        }

        info!(
            server = %entry.name(),
            state = %state,
            epoch,
            message = message.as_deref().unwrap_or(""),
            "[SessionManager] State changed"
        );
        self.events.emit(DomainEvent::BackendStateChanged {
            server: entry.name().to_string(),
            state,
            epoch,
            message,
        });
    }

    fn status_of(&self, entry: &BackendEntry) -> BackendStatus {
        let snapshot = self.aggregator.snapshot();
        let catalog = snapshot.backend(entry.name());
        let count = |kind| catalog.map(|c| c.count(kind)).unwrap_or(0);
        let session = entry.session.read().clone();
        let runtime = entry.runtime.read();

        BackendStatus {
            name: entry.name().to_string(),
            alias: entry.definition.effective_alias().to_string(),
            transport: entry.definition.transport.transport_type(),
            state: runtime.state,
            epoch: runtime.epoch,
            attempts: runtime.attempts,
            last_error: runtime.last_error.clone(),
            persistent_error: runtime.persistent_error.as_ref().map(|e| e.to_string()),
            in_flight: session.as_ref().map(|s| s.in_flight()).unwrap_or(0),
            rejected_responses: session.as_ref().map(|s| s.rejected_responses()).unwrap_or(0),
            tools: count(CapabilityKind::Tool),
            prompts: count(CapabilityKind::Prompt),
            resources: count(CapabilityKind::Resource),
            resource_templates: count(CapabilityKind::ResourceTemplate),
            since: runtime.since,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the transport, handshake and fetch the initial catalog
    async fn establish(
        &self,
        entry: &BackendEntry,
        epoch: u64,
    ) -> RouterResult<(
        Arc<Session>,
        mpsc::UnboundedReceiver<SessionSignal>,
        BTreeMap<CapabilityKind, Vec<Value>>,
    )> {
        let name = entry.name();
        let options = TransportOptions {
            connect_timeout: self.config.connect_timeout,
            shutdown_grace: self.config.shutdown_grace,
        };
        let transport = TransportFactory::create(&entry.definition, &self.connectors, &options);
        debug!(server = %name, epoch, transport = %transport.description(), "[SessionManager] Connecting");

        let link = tokio::time::timeout(self.config.connect_timeout, transport.connect())
            .await
            .map_err(|_| RouterError::Timeout {
                server: name.to_string(),
                method: "connect".to_string(),
                after: self.config.connect_timeout,
            })??;

        let (session, signals) = Session::open(
            name,
            epoch,
            link,
            self.request_ids.clone(),
            self.tracker.clone(),
        );
        let capabilities = session.initialize(self.config.connect_timeout).await?;

        let mut lists = BTreeMap::new();
        for kind in CapabilityKind::ALL {
            if capabilities.get(kind.capability_field()).is_none() {
                continue;
            }
            lists.insert(kind, self.fetch_list(&session, kind).await?);
        }

        Ok((session, signals, lists))
    }

    /// Fetch one list; a backend error reply counts as an empty list
    async fn fetch_list(&self, session: &Arc<Session>, kind: CapabilityKind) -> RouterResult<Vec<Value>> {
        match session.list_all(kind, self.config.request_timeout).await {
            Ok(items) => Ok(items),
            Err(RouterError::BackendError { code, message, .. }) => {
                if code != protocol::METHOD_NOT_FOUND {
                    warn!(
                        server = %session.server(),
                        method = kind.list_method(),
                        code,
                        message = %message,
                        "[SessionManager] List failed, treating as empty"
                    );
                }
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Drive a Ready session until it fails or the supervisor is cancelled
    async fn run_session(
        &self,
        entry: &BackendEntry,
        session: &Arc<Session>,
        mut signals: mpsc::UnboundedReceiver<SessionSignal>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let name = entry.name();
        let probe_cancel = cancel.child_token();
        let _stop_probe = probe_cancel.clone().drop_guard();
        let (probe_tx, mut probe_rx) = oneshot::channel();
        let mut probe_done = false;
        tokio::spawn(probe_loop(
            session.clone(),
            self.config.clone(),
            probe_cancel,
            probe_tx,
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                failure = &mut probe_rx, if !probe_done => {
                    probe_done = true;
                    if let Ok(err) = failure {
                        return SessionEnd::Failed(err);
                    }
                }
                signal = signals.recv() => match signal {
                    None => {
                        return SessionEnd::Failed(RouterError::transport(name, "session read loop ended"));
                    }
                    Some(SessionSignal::Failed(err)) => return SessionEnd::Failed(err),
                    Some(SessionSignal::ListChanged(kinds)) => {
                        let refresh = self.refresh_lists(session, kinds);
                        tokio::select! {
                            _ = cancel.cancelled() => return SessionEnd::Cancelled,
                            result = refresh => {
                                if let Err(err) = result {
                                    return SessionEnd::Failed(err);
                                }
                            }
                        }
                    }
                    Some(SessionSignal::Log { level, logger, data }) => {
                        relay_backend_log(name, &level, logger.as_deref(), &data);
                        self.events.emit(DomainEvent::BackendLog {
                            server: name.to_string(),
                            level,
                            logger,
                            data,
                        });
                    }
                },
            }
        }
    }

    async fn refresh_lists(
        &self,
        session: &Arc<Session>,
        kinds: &'static [CapabilityKind],
    ) -> RouterResult<()> {
        for kind in kinds {
            match self.fetch_list(session, *kind).await {
                Ok(items) => self.aggregator.update_kind(session.server(), *kind, items),
                Err(err @ RouterError::BackendProtocolError { .. })
                | Err(err @ RouterError::Transport { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        server = %session.server(),
                        method = kind.list_method(),
                        error = %err,
                        "[SessionManager] List refresh failed, keeping previous list"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Supervisor task: connect with bounded backoff, run, reconnect on failure
async fn supervise(inner: Arc<ManagerInner>, entry: Arc<BackendEntry>, cancel: CancellationToken) {
    let name = entry.name().to_string();
    let backoff = Backoff::new(
        inner.config.startup_attempts,
        inner.config.backoff_base,
        inner.config.backoff_max,
    );
    let mut failures: u32 = 0;

    loop {
        let epoch = inner.next_epoch();
        inner.set_state(&entry, SessionState::Connecting, epoch, None);

        let established = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.establish(&entry, epoch) => result,
        };

        let delay = match established {
            Ok((session, signals, lists)) => {
                failures = 0;
                {
                    let mut runtime = entry.runtime.write();
                    runtime.attempts = 0;
                    runtime.last_error = None;
                }
                *entry.session.write() = Some(session.clone());
                inner.set_state(&entry, SessionState::Ready, epoch, None);
                inner.aggregator.publish(&name, lists);

                match inner.run_session(&entry, &session, signals, &cancel).await {
                    // The stopper drains and closes the session
                    SessionEnd::Cancelled => return,
                    SessionEnd::Failed(err) => {
                        warn!(server = %name, epoch, error = %err, "[SessionManager] Session failed");
                        inner.aggregator.withdraw(&name);
                        entry.session.write().take();
                        session.close(&err.to_string());
                        entry.runtime.write().last_error = Some(err.to_string());
                        inner.set_state(&entry, SessionState::Degraded, epoch, Some(err.to_string()));
                        backoff.delay(1)
                    }
                }
            }
            Err(err) => {
                failures += 1;
                {
                    let mut runtime = entry.runtime.write();
                    runtime.attempts = failures;
                    runtime.last_error = Some(err.to_string());
                }
                warn!(
                    server = %name,
                    attempt = failures,
                    max_attempts = backoff.attempts,
                    error = %err,
                    "[SessionManager] Connect failed"
                );

                if !backoff.allows_retry(failures) {
                    let persistent = RouterError::PersistentConfigError {
                        server: name.clone(),
                        attempts: failures,
                        reason: err.to_string(),
                    };
                    error!(server = %name, error = %persistent, "[SessionManager] Giving up until configuration changes");
                    entry.runtime.write().persistent_error = Some(persistent.clone());
                    inner.set_state(&entry, SessionState::Disconnected, epoch, Some(persistent.to_string()));
                    inner.events.emit(DomainEvent::BackendFailed {
                        server: name.clone(),
                        attempts: failures,
                        error: err.to_string(),
                    });
                    return;
                }
                backoff.delay(failures)
            }
        };

        debug!(server = %name, ?delay, "[SessionManager] Reconnecting after backoff");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Liveness probe: `ping` every interval; report after N consecutive failures
async fn probe_loop(
    session: Arc<Session>,
    config: SessionManagerConfig,
    cancel: CancellationToken,
    report: oneshot::Sender<RouterError>,
) {
    let start = tokio::time::Instant::now() + config.probe_interval;
    let mut ticker = tokio::time::interval_at(start, config.probe_interval);
    let mut consecutive: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = session.ping(config.probe_timeout) => result,
        };

        match result {
            Ok(()) => consecutive = 0,
            Err(err) => {
                consecutive += 1;
                warn!(
                    server = %session.server(),
                    consecutive,
                    threshold = config.probe_failure_threshold,
                    error = %err,
                    "[SessionManager] Liveness probe failed"
                );
                if consecutive >= config.probe_failure_threshold {
                    let _ = report.send(RouterError::unavailable(
                        session.server(),
                        format!("{} consecutive liveness probes failed", consecutive),
                    ));
                    return;
                }
            }
        }
    }
}

/// Re-emit a backend `notifications/message` through tracing
fn relay_backend_log(server: &str, level: &str, logger: Option<&str>, data: &Value) {
    let logger = logger.unwrap_or("");
    match level {
        "debug" => debug!(server = %server, logger, data = %data, "[Backend] log"),
        "info" | "notice" => info!(server = %server, logger, data = %data, "[Backend] log"),
        "warning" => warn!(server = %server, logger, data = %data, "[Backend] log"),
        "error" | "critical" | "alert" | "emergency" => {
            error!(server = %server, logger, data = %data, "[Backend] log")
        }
        _ => trace!(server = %server, logger, level, data = %data, "[Backend] log"),
    }
}
