//! Event Bus - Central event distribution system
//!
//! All domain events flow through this bus, decoupling producers from
//! consumers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Event Bus (broadcast channel)               │
//! │                                                                 │
//! │  Producers:                    Consumers:                       │
//! │  ├─ SessionManager             ├─ MCPNotifier (→ list_changed)  │
//! │  ├─ CapabilityAggregator       ├─ per-client pumps              │
//! │  └─ ConfigWatcher              └─ embedders / tests             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let event_bus = EventBus::new();
//! let sender = event_bus.sender();
//! let mut receiver = event_bus.subscribe();
//!
//! sender.emit(DomainEvent::GatewayStopped);
//! while let Some(event) = receiver.recv().await { ... }
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::DomainEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Event Bus - Central hub for domain event distribution
///
/// Uses a broadcast channel so every consumer receives every event.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a sender for emitting events
    pub fn sender(&self) -> EventSender {
        EventSender::new(self.sender.clone())
    }

    /// Subscribe to receive events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event Sender - Used by components to emit domain events
///
/// Thread-safe and cheaply cloneable.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventSender {
    fn new(sender: broadcast::Sender<DomainEvent>) -> Self {
        Self { sender }
    }

    /// Emit a domain event
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no subscribers (not an error).
    pub fn emit(&self, event: DomainEvent) -> usize {
        let type_name = event.type_name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(
                    event_type = type_name,
                    "[EventBus] No receivers for event"
                );
                0
            }
        }
    }

    /// Check if there are any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Outcome of a lag-aware receive
#[derive(Debug, Clone)]
pub enum Received {
    Event(DomainEvent),
    /// The receiver fell behind and `skipped` events were lost
    Lagged { skipped: u64 },
}

/// Event Receiver - Used by consumers to receive domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<DomainEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event (async)
    ///
    /// Returns `None` if the channel is closed. Lag is logged and skipped;
    /// consumers that must not lose changes use [`EventReceiver::recv_lagged`].
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.recv_lagged().await? {
                Received::Event(event) => return Some(event),
                Received::Lagged { .. } => continue,
            }
        }
    }

    /// Receive the next event, reporting lag to the caller
    pub async fn recv_lagged(&mut self) -> Option<Received> {
        match self.receiver.recv().await {
            Ok(event) => Some(Received::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    skipped_events = skipped,
                    "[EventBus] Receiver lagged, skipped {} events", skipped
                );
                Some(Received::Lagged { skipped })
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("[EventBus] Channel closed");
                None
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(
                    skipped_events = skipped,
                    "[EventBus] Receiver lagged on try_recv"
                );
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

/// Shared event bus for application-wide use
pub type SharedEventBus = Arc<EventBus>;

/// Create a shared event bus
pub fn create_shared_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}

// ============================================================================
// TESTS
// ============================================================================
