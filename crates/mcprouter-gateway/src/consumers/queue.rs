//! Bounded per-client outbound queue
//!
//! Holds `list_changed` notifications (low priority, coalesced per list) and
//! progress notifications (high priority). When full, the configured
//! [`BackpressurePolicy`] decides what gives way. The queue only ever slows
//! down its own client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mcprouter_core::{BackpressurePolicy, CapabilityKind};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::trace;

/// The three list_changed notifications a client can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Tools,
    Prompts,
    Resources,
}

impl ListKind {
    pub const ALL: [ListKind; 3] = [ListKind::Tools, ListKind::Prompts, ListKind::Resources];

    pub fn from_capability(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Tool => Self::Tools,
            CapabilityKind::Prompt => Self::Prompts,
            CapabilityKind::Resource | CapabilityKind::ResourceTemplate => Self::Resources,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    ListChanged(ListKind),
    /// `notifications/progress` params, already carrying the client's token
    Progress(Value),
}

impl Outbound {
    fn is_low_priority(&self) -> bool {
        matches!(self, Self::ListChanged(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// An identical list_changed was already waiting
    Coalesced,
    /// Queued after evicting an older item
    Evicted,
    /// No room within the allowed wait; the item was dropped
    Dropped,
    Closed,
}

struct QueueState {
    items: VecDeque<Outbound>,
    closed: bool,
}

pub struct OutboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: BackpressurePolicy,
    /// Signalled when an item is queued
    ready: Notify,
    /// Signalled when an item is taken
    space: Notify,
    dropped: AtomicU64,
    coalesced: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            ready: Notify::new(),
            space: Notify::new(),
            dropped: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Queue an item, applying the backpressure policy when full
    pub async fn push(&self, item: Outbound) -> PushOutcome {
        let max_wait = match self.policy {
            BackpressurePolicy::DropOldest => return self.offer(item),
            BackpressurePolicy::Block { max_wait_ms } => Duration::from_millis(max_wait_ms),
        };

        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            match self.try_queue(&item) {
                Some(outcome) => return outcome,
                None => {
                    if tokio::time::timeout_at(deadline, self.space.notified())
                        .await
                        .is_err()
                    {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(item = ?item, "[OutboundQueue] Dropped after waiting for space");
                        return PushOutcome::Dropped;
                    }
                }
            }
        }
    }

    /// Queue without waiting; when full, evict the oldest low-priority item
    /// (or the oldest item if there is none).
    pub fn offer(&self, item: Outbound) -> PushOutcome {
        if let Some(outcome) = self.try_queue(&item) {
            return outcome;
        }

        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Closed;
        }
        let victim = state
            .items
            .iter()
            .position(Outbound::is_low_priority)
            .unwrap_or(0);
        state.items.remove(victim);
        state.items.push_back(item);
        drop(state);

        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
        PushOutcome::Evicted
    }

    /// `None` means full
    fn try_queue(&self, item: &Outbound) -> Option<PushOutcome> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(PushOutcome::Closed);
        }
        if item.is_low_priority() && state.items.contains(item) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Some(PushOutcome::Coalesced);
        }
        if state.items.len() >= self.capacity {
            return None;
        }
        state.items.push_back(item.clone());
        drop(state);
        self.ready.notify_one();
        Some(PushOutcome::Queued)
    }

    /// Next item; `None` once closed and empty
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_one();
        self.space.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items lost to backpressure
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
