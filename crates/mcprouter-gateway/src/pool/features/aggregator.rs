//! Capability Aggregator
//!
//! Holds the merged, namespaced catalog of every Ready backend plus the alias
//! registry that makes exposed names unique.
//!
//! The catalog is a copy-on-write snapshot: readers clone an `Arc` and never
//! wait on writers, writers are serialized by `write_lock`. Changes are
//! applied per backend, so one backend's churn never touches another
//! backend's entries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mcprouter_core::{CapabilityKind, DomainEvent, EventSender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::namespace::Namespace;
use crate::error::{RouterError, RouterResult};

/// One namespaced capability
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub exposed: String,
    pub original: String,
    /// The backend's descriptor with its key field rewritten to `exposed`
    pub descriptor: Value,
}

/// Everything one backend contributes to the catalog
#[derive(Debug, Clone, Default)]
pub struct BackendCatalog {
    pub server: String,
    pub alias: String,
    lists: BTreeMap<CapabilityKind, Vec<CatalogEntry>>,
}

impl BackendCatalog {
    pub fn entries(&self, kind: CapabilityKind) -> &[CatalogEntry] {
        self.lists.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, kind: CapabilityKind) -> usize {
        self.entries(kind).len()
    }

    fn find(&self, kind: CapabilityKind, original: &str) -> Option<&CatalogEntry> {
        self.entries(kind).iter().find(|e| e.original == original)
    }
}

/// Immutable view of the whole catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    backends: HashMap<String, Arc<BackendCatalog>>,
    /// alias -> backend name
    aliases: HashMap<String, String>,
}

impl CatalogSnapshot {
    pub fn backend(&self, server: &str) -> Option<&Arc<BackendCatalog>> {
        self.backends.get(server)
    }

    pub fn server_for_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn alias_of(&self, server: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, s)| s.as_str() == server)
            .map(|(a, _)| a.as_str())
    }

    /// Every exposed key of one kind, across all backends
    pub fn exposed_keys(&self, kind: CapabilityKind) -> Vec<String> {
        let mut keys: Vec<String> = self
            .backends
            .values()
            .flat_map(|b| b.entries(kind).iter().map(|e| e.exposed.clone()))
            .collect();
        keys.sort();
        keys
    }
}

/// A resolved exposed name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub server: String,
    pub alias: String,
    pub original: String,
}

pub struct CapabilityAggregator {
    namespace: Namespace,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    write_lock: Mutex<()>,
    seq: AtomicU64,
    events: Option<EventSender>,
}

impl CapabilityAggregator {
    pub fn new(namespace: Namespace, events: Option<EventSender>) -> Self {
        Self {
            namespace,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
            events,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Current catalog. Cheap; never blocks on writers for long.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().clone()
    }

    /// Apply `f` to a copy of the snapshot and install it
    fn update<R>(&self, f: impl FnOnce(&mut CatalogSnapshot) -> R) -> R {
        let _writer = self.write_lock.lock();
        let mut next = (*self.snapshot()).clone();
        let result = f(&mut next);
        *self.snapshot.write() = Arc::new(next);
        result
    }

    // ------------------------------------------------------------------------
    // Alias registry
    // ------------------------------------------------------------------------

    /// Reserve `alias` for `server`. First registration wins.
    pub fn register_alias(&self, server: &str, alias: &str) -> RouterResult<()> {
        self.namespace.validate_alias(server, alias)?;

        let _writer = self.write_lock.lock();
        let current = self.snapshot();
        match current.aliases.get(alias) {
            Some(owner) if owner == server => return Ok(()),
            Some(owner) => {
                return Err(RouterError::AliasConflict {
                    alias: alias.to_string(),
                    existing: owner.clone(),
                    rejected: server.to_string(),
                })
            }
            None => {}
        }

        let mut next = (*current).clone();
        next.aliases.retain(|_, owner| owner != server);
        next.aliases.insert(alias.to_string(), server.to_string());
        *self.snapshot.write() = Arc::new(next);

        debug!(server = %server, alias = %alias, "[Catalog] Alias registered");
        Ok(())
    }

    pub fn release_alias(&self, server: &str) {
        self.update(|snap| snap.aliases.retain(|_, owner| owner != server));
    }

    // ------------------------------------------------------------------------
    // Catalog deltas
    // ------------------------------------------------------------------------

    /// Replace one backend's whole contribution
    pub fn publish(&self, server: &str, lists: BTreeMap<CapabilityKind, Vec<Value>>) {
        self.apply(server, lists, true);
    }

    /// Replace one list of one backend, keeping the others
    pub fn update_kind(&self, server: &str, kind: CapabilityKind, items: Vec<Value>) {
        self.apply(server, BTreeMap::from([(kind, items)]), false);
    }

    fn apply(&self, server: &str, lists: BTreeMap<CapabilityKind, Vec<Value>>, replace_all: bool) {
        let _writer = self.write_lock.lock();
        let current = self.snapshot();

        let Some(alias) = current.alias_of(server).map(str::to_string) else {
            debug!(server = %server, "[Catalog] Ignoring publish for unregistered backend");
            return;
        };

        let previous = current.backends.get(server).cloned();
        if !replace_all && previous.is_none() {
            // Not Ready (anymore); a later publish carries the full catalog
            return;
        }

        let mut catalog = match (&previous, replace_all) {
            (Some(prev), false) => (**prev).clone(),
            _ => BackendCatalog {
                server: server.to_string(),
                alias: alias.clone(),
                lists: BTreeMap::new(),
            },
        };
        for (kind, items) in lists {
            catalog
                .lists
                .insert(kind, self.namespace_items(server, &alias, kind, items));
        }

        let changed: Vec<CapabilityKind> = CapabilityKind::ALL
            .into_iter()
            .filter(|kind| {
                let before = previous.as_ref().map(|p| p.entries(*kind)).unwrap_or(&[]);
                before != catalog.entries(*kind)
            })
            .collect();

        let counts: Vec<(CapabilityKind, usize)> = CapabilityKind::ALL
            .into_iter()
            .map(|k| (k, catalog.count(k)))
            .collect();

        let mut next = (*current).clone();
        next.backends.insert(server.to_string(), Arc::new(catalog));
        *self.snapshot.write() = Arc::new(next);

        if changed.is_empty() {
            return;
        }
        info!(
            server = %server,
            alias = %alias,
            counts = ?counts,
            "[Catalog] Published backend capabilities"
        );
        self.emit_changed(server, changed);
    }

    /// Remove every entry of one backend
    pub fn withdraw(&self, server: &str) {
        let _writer = self.write_lock.lock();
        let current = self.snapshot();
        let Some(removed) = current.backends.get(server).cloned() else {
            return;
        };

        let mut next = (*current).clone();
        next.backends.remove(server);
        *self.snapshot.write() = Arc::new(next);

        let changed: Vec<CapabilityKind> = CapabilityKind::ALL
            .into_iter()
            .filter(|k| removed.count(*k) > 0)
            .collect();
        info!(server = %server, "[Catalog] Withdrew backend capabilities");
        self.emit_changed(server, changed);
    }

    fn emit_changed(&self, server: &str, kinds: Vec<CapabilityKind>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(events) = &self.events {
            events.emit(DomainEvent::CatalogChanged {
                server: server.to_string(),
                kinds,
                seq,
            });
        }
    }

    fn namespace_items(
        &self,
        server: &str,
        alias: &str,
        kind: CapabilityKind,
        items: Vec<Value>,
    ) -> Vec<CatalogEntry> {
        let key = kind.key_field();
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(items.len());

        for mut item in items {
            let Some(original) = item.get(key).and_then(Value::as_str).map(str::to_string) else {
                warn!(server = %server, ?kind, "[Catalog] Skipping descriptor without '{}'", key);
                continue;
            };
            if !seen.insert(original.clone()) {
                warn!(server = %server, ?kind, name = %original, "[Catalog] Skipping duplicate descriptor");
                continue;
            }
            let exposed = self.namespace.qualify(alias, &original);
            item[key] = Value::String(exposed.clone());
            entries.push(CatalogEntry {
                exposed,
                original,
                descriptor: item,
            });
        }
        entries
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Namespaced descriptors of one kind for the given backends, in order
    pub fn list(&self, kind: CapabilityKind, servers: &[String]) -> Vec<Value> {
        let snapshot = self.snapshot();
        servers
            .iter()
            .filter_map(|s| snapshot.backends.get(s))
            .flat_map(|b| b.entries(kind).iter().map(|e| e.descriptor.clone()))
            .collect()
    }

    /// Map an exposed name back to `(backend, original)`.
    ///
    /// Tools and prompts must be present in the backend's published
    /// catalog. Resource URIs only need a known alias, since templates
    /// produce URIs that are never listed. A backend that is registered but
    /// not Ready still resolves so that the caller gets `BackendUnavailable`
    /// rather than `NameNotFound`.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        exposed: &str,
        allowed: &[String],
    ) -> RouterResult<Resolved> {
        let not_found = || RouterError::not_found(exposed);
        let (alias, original) = self.namespace.split(exposed).ok_or_else(not_found)?;

        let snapshot = self.snapshot();
        let server = snapshot.server_for_alias(alias).ok_or_else(not_found)?;
        if !allowed.iter().any(|s| s == server) {
            return Err(not_found());
        }

        if let Some(catalog) = snapshot.backends.get(server) {
            let listed = matches!(kind, CapabilityKind::Tool | CapabilityKind::Prompt);
            if listed && catalog.find(kind, original).is_none() {
                return Err(not_found());
            }
        }

        Ok(Resolved {
            server: server.to_string(),
            alias: alias.to_string(),
            original: original.to_string(),
        })
    }
}
