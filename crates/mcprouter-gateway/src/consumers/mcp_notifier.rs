//! MCP Notifier - delivers list_changed and progress notifications to clients
//!
//! **Per-client isolation:**
//! - every client gets its own bounded [`OutboundQueue`]
//! - a *pump* task turns DomainEvents into queue items for that client only
//! - a *writer* task drains the queue into the client's peer
//!
//! A slow client therefore only ever fills its own queue; the backpressure
//! policy decides what happens then. If a pump falls behind the event bus it
//! queues a full refresh instead, so every change is still announced at
//! least once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mcprouter_core::{
    BackpressurePolicy, DomainEvent, EventReceiver, EventSender, Received, SharedEventBus,
};
use parking_lot::RwLock;
use rmcp::{model::ProgressNotificationParam, service::Peer, RoleServer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::queue::{ListKind, Outbound, OutboundQueue, PushOutcome};
use crate::pool::ProgressSink;
use crate::services::ProfileResolverService;

/// Where a client's notifications finally go
#[async_trait]
pub trait ClientSink: Send + Sync + 'static {
    async fn list_changed(&self, kind: ListKind) -> anyhow::Result<()>;
    async fn progress(&self, params: Value) -> anyhow::Result<()>;
}

#[async_trait]
impl ClientSink for Peer<RoleServer> {
    async fn list_changed(&self, kind: ListKind) -> anyhow::Result<()> {
        match kind {
            ListKind::Tools => self.notify_tool_list_changed().await?,
            ListKind::Prompts => self.notify_prompt_list_changed().await?,
            ListKind::Resources => self.notify_resource_list_changed().await?,
        }
        Ok(())
    }

    async fn progress(&self, params: Value) -> anyhow::Result<()> {
        let params: ProgressNotificationParam = serde_json::from_value(params)?;
        self.notify_progress(params).await?;
        Ok(())
    }
}

struct ClientHandle {
    profile: String,
    queue: Arc<OutboundQueue>,
    cancel: CancellationToken,
}

pub struct MCPNotifier {
    clients: RwLock<HashMap<String, ClientHandle>>,
    bus: SharedEventBus,
    events: EventSender,
    profiles: Arc<ProfileResolverService>,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl MCPNotifier {
    pub fn new(
        bus: SharedEventBus,
        profiles: Arc<ProfileResolverService>,
        capacity: usize,
        policy: BackpressurePolicy,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            events: bus.sender(),
            bus,
            profiles,
            capacity,
            policy,
        }
    }

    /// Start delivering notifications to a client
    ///
    /// Replaces any previous registration under the same id.
    pub fn register_client(&self, client_id: &str, profile: &str, sink: Arc<dyn ClientSink>) {
        let queue = Arc::new(OutboundQueue::new(self.capacity, self.policy));
        let cancel = CancellationToken::new();
        // Subscribe before returning so no change after registration is missed
        let events = self.bus.subscribe();

        tokio::spawn(pump(
            client_id.to_string(),
            profile.to_string(),
            queue.clone(),
            events,
            self.profiles.clone(),
            cancel.clone(),
        ));
        tokio::spawn(writer(client_id.to_string(), queue.clone(), sink, cancel.clone()));

        let previous = self.clients.write().insert(
            client_id.to_string(),
            ClientHandle {
                profile: profile.to_string(),
                queue,
                cancel,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            previous.queue.close();
        }

        info!(
            client_id = %client_id,
            profile = %profile,
            total_clients = self.client_count(),
            "[MCPNotifier] Registered client"
        );
        self.events.emit(DomainEvent::ClientConnected {
            client_id: client_id.to_string(),
            profile: profile.to_string(),
        });
    }

    pub fn unregister_client(&self, client_id: &str) {
        let removed = self.clients.write().remove(client_id);
        match removed {
            Some(handle) => {
                handle.cancel.cancel();
                handle.queue.close();
                info!(
                    client_id = %client_id,
                    profile = %handle.profile,
                    remaining = self.client_count(),
                    "[MCPNotifier] Unregistered client"
                );
                self.events.emit(DomainEvent::ClientDisconnected {
                    client_id: client_id.to_string(),
                });
            }
            None => trace!(client_id = %client_id, "[MCPNotifier] Unregister for unknown client"),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// A sink that relays backend progress to this client.
    ///
    /// Called from backend read loops, so it never waits: a full queue
    /// evicts its oldest low-priority item instead.
    pub fn progress_sink(&self, client_id: &str) -> Option<ProgressSink> {
        let queue = self.clients.read().get(client_id)?.queue.clone();
        let client_id = client_id.to_string();
        Some(Arc::new(move |params: Value| {
            if queue.offer(Outbound::Progress(params)) == PushOutcome::Evicted {
                debug!(client_id = %client_id, "[MCPNotifier] Queue full, evicted oldest notification");
            }
        }))
    }
}

/// DomainEvents -> this client's queue
async fn pump(
    client_id: String,
    profile: String,
    queue: Arc<OutboundQueue>,
    mut events: EventReceiver,
    profiles: Arc<ProfileResolverService>,
    cancel: CancellationToken,
) {
    let mut known_servers = profiles.servers(&profile);

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv_lagged() => received,
        };

        let kinds: Vec<ListKind> = match received {
            None => break,
            Some(Received::Lagged { skipped }) => {
                warn!(
                    client_id = %client_id,
                    skipped,
                    "[MCPNotifier] Fell behind event bus, sending full refresh"
                );
                ListKind::ALL.to_vec()
            }
            Some(Received::Event(DomainEvent::CatalogChanged { server, kinds, seq })) => {
                let servers = profiles.servers(&profile);
                if !servers.contains(&server) {
                    continue;
                }
                trace!(client_id = %client_id, server = %server, seq, "[MCPNotifier] Catalog change");
                let mut lists: Vec<ListKind> = Vec::new();
                for kind in kinds.into_iter().map(ListKind::from_capability) {
                    if !lists.contains(&kind) {
                        lists.push(kind);
                    }
                }
                lists
            }
            Some(Received::Event(DomainEvent::ProfilesReloaded { .. })) => {
                let servers = profiles.servers(&profile);
                if servers == known_servers {
                    continue;
                }
                debug!(client_id = %client_id, profile = %profile, "[MCPNotifier] Profile membership changed");
                known_servers = servers;
                ListKind::ALL.to_vec()
            }
            Some(Received::Event(_)) => continue,
        };

        for kind in kinds {
            let pushed = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = queue.push(Outbound::ListChanged(kind)) => outcome,
            };
            match pushed {
                PushOutcome::Closed => return,
                PushOutcome::Dropped => {
                    warn!(client_id = %client_id, ?kind, "[MCPNotifier] Client too slow, notification dropped")
                }
                _ => {}
            }
        }
    }
    trace!(client_id = %client_id, "[MCPNotifier] Pump stopped");
}

/// This client's queue -> its peer
async fn writer(
    client_id: String,
    queue: Arc<OutboundQueue>,
    sink: Arc<dyn ClientSink>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.pop() => item,
        };
        let result = match item {
            None => break,
            Some(Outbound::ListChanged(kind)) => {
                debug!(client_id = %client_id, ?kind, "[MCPNotifier] Sending list_changed");
                sink.list_changed(kind).await
            }
            Some(Outbound::Progress(params)) => sink.progress(params).await,
        };
        if let Err(e) = result {
            debug!(client_id = %client_id, error = %e, "[MCPNotifier] Failed to deliver notification");
        }
    }
    trace!(client_id = %client_id, "[MCPNotifier] Writer stopped");
}
