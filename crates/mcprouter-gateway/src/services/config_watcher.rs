//! Config Watcher - keeps running sessions in line with the Profile Store
//!
//! Every tick (or on an explicit reload) the store is read and diffed against
//! the definitions this watcher last applied:
//! - missing -> `stop` (graceful drain)
//! - changed -> `start` (update)
//! - new -> `start`
//! - unchanged -> nothing; a backend in persistent error waits for a change
//!
//! A store that fails to load keeps the previous state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mcprouter_core::{BackendDefinition, DomainEvent, EventSender, ProfileStore};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ProfileResolverService;
use crate::error::RouterError;
use crate::pool::{SessionManager, StartOutcome};

/// What one reconcile pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub updated: Vec<String>,
    pub stopped: Vec<String>,
    /// `(server, reason)` for definitions that could not be registered
    pub rejected: Vec<(String, String)>,
    pub profiles_changed: bool,
}

impl ReconcileReport {
    pub fn has_changes(&self) -> bool {
        !(self.started.is_empty()
            && self.updated.is_empty()
            && self.stopped.is_empty()
            && self.rejected.is_empty())
            || self.profiles_changed
    }
}

#[derive(Default)]
struct Applied {
    /// Definitions handed to the session manager
    running: BTreeMap<String, BackendDefinition>,
    /// Definitions refused (alias conflict or invalid alias), kept to avoid
    /// re-logging the same rejection on every tick
    rejected: BTreeMap<String, BackendDefinition>,
}

pub struct ConfigWatcher {
    store: Arc<dyn ProfileStore>,
    sessions: SessionManager,
    profiles: Arc<ProfileResolverService>,
    events: EventSender,
    applied: Mutex<Applied>,
    interval: Duration,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        sessions: SessionManager,
        profiles: Arc<ProfileResolverService>,
        events: EventSender,
        interval: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            profiles,
            events,
            applied: Mutex::new(Applied::default()),
            interval,
            debounce,
        }
    }

    /// Read the store once and apply the difference
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let snapshot = self
            .store
            .load()
            .await
            .with_context(|| format!("Failed to load profile store {}", self.store.describe()))?;

        for (profile, server) in snapshot.dangling_references() {
            warn!(profile = %profile, server = %server, "[ConfigWatcher] Profile references an undefined server");
        }

        let desired = snapshot.desired_backends();
        let mut applied = self.applied.lock().await;
        let mut report = ReconcileReport::default();

        // Removals first so that freed aliases can be reused below
        let removed: Vec<String> = applied
            .running
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            self.sessions.stop(&name).await;
            applied.running.remove(&name);
            report.stopped.push(name);
        }
        applied.rejected.retain(|name, _| desired.contains_key(name));

        // Running backends keep their alias; changed ones are updated first
        let changed: Vec<&BackendDefinition> = desired
            .values()
            .filter(|def| matches!(applied.running.get(&def.name), Some(prev) if prev != *def))
            .collect();
        // A rejected alias may have been freed by a stop or a rename; give
        // every rejected backend another try in that case
        let alias_freed = !report.stopped.is_empty()
            || changed.iter().any(|def| {
                applied
                    .running
                    .get(&def.name)
                    .is_some_and(|prev| prev.effective_alias() != def.effective_alias())
            });
        if alias_freed {
            applied.rejected.clear();
        }
        let added: Vec<&BackendDefinition> = desired
            .values()
            .filter(|def| !applied.running.contains_key(&def.name))
            .filter(|def| applied.rejected.get(&def.name) != Some(*def))
            .collect();

        for def in changed.into_iter().chain(added) {
            let was_running = applied.running.contains_key(&def.name);
            match self.sessions.start(def.clone()).await {
                Ok(StartOutcome::Disabled) => {
                    applied.running.remove(&def.name);
                }
                Ok(outcome) => {
                    debug!(server = %def.name, ?outcome, "[ConfigWatcher] Applied");
                    applied.running.insert(def.name.clone(), def.clone());
                    applied.rejected.remove(&def.name);
                    if was_running {
                        report.updated.push(def.name.clone());
                    } else {
                        report.started.push(def.name.clone());
                    }
                }
                Err(err @ (RouterError::AliasConflict { .. } | RouterError::InvalidAlias { .. })) => {
                    error!(server = %def.name, error = %err, "[ConfigWatcher] Backend rejected");
                    applied.running.remove(&def.name);
                    applied.rejected.insert(def.name.clone(), def.clone());
                    report.rejected.push((def.name.clone(), err.to_string()));
                }
                Err(err) => {
                    warn!(server = %def.name, error = %err, "[ConfigWatcher] Failed to apply backend");
                }
            }
        }
        drop(applied);

        report.profiles_changed = self.profiles.publish(snapshot.profiles.clone());

        if report.has_changes() {
            info!(
                started = ?report.started,
                updated = ?report.updated,
                stopped = ?report.stopped,
                rejected = report.rejected.len(),
                "[ConfigWatcher] Reconciled"
            );
            self.events.emit(DomainEvent::ProfilesReloaded {
                profiles: snapshot.profiles.keys().cloned().collect(),
                started: report.started.clone(),
                updated: report.updated.clone(),
                stopped: report.stopped.clone(),
            });
        }
        Ok(report)
    }

    /// Stop every backend this watcher started
    pub async fn stop_all(&self) {
        let mut applied = self.applied.lock().await;
        let names: Vec<String> = applied.running.keys().cloned().collect();
        for name in names {
            self.sessions.stop(&name).await;
            applied.running.remove(&name);
        }
    }

    /// Run the reconcile loop until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Result<ConfigWatcherHandle> {
        let (reload_tx, mut reload_rx) = mpsc::channel::<()>(1);

        let file_watcher = match self.store.watch_path() {
            Some(path) => Some(watch_file(&path, reload_tx.clone())?),
            None => None,
        };

        let watcher = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watcher.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                store = %watcher.store.describe(),
                interval = ?watcher.interval,
                "[ConfigWatcher] Started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    Some(()) = reload_rx.recv() => {
                        // Let bursts of file events settle
                        tokio::time::sleep(watcher.debounce).await;
                        while reload_rx.try_recv().is_ok() {}
                        debug!("[ConfigWatcher] Reload requested");
                    }
                }

                if let Err(e) = watcher.reconcile().await {
                    error!("[ConfigWatcher] Reconcile failed, keeping previous state: {:#}", e);
                }
            }
            info!("[ConfigWatcher] Stopped");
        });

        Ok(ConfigWatcherHandle {
            reload_tx,
            task,
            _file_watcher: file_watcher,
        })
    }
}

/// Handle to a running watcher
pub struct ConfigWatcherHandle {
    reload_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    /// Kept alive to continue watching
    _file_watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcherHandle {
    /// Ask for a reconcile as soon as possible
    pub fn reload(&self) {
        // A pending reload already covers this one
        let _ = self.reload_tx.try_send(());
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("[ConfigWatcher] Task failed: {}", e);
        }
    }
}

/// Watch the store file's directory; editors often replace files by rename
fn watch_file(path: &Path, reload: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }
            let relevant = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if relevant {
                debug!("[ConfigWatcher] Store file change detected: {:?}", event.paths);
                let _ = reload.try_send(());
            }
        }
        Err(e) => error!("[ConfigWatcher] File watcher error: {}", e),
    })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("[ConfigWatcher] Watching {:?}", path);
    Ok(watcher)
}
