//! Correlation table
//!
//! Tracks which backend request answers which frontend request. Frontend
//! and backend request ids live in unrelated id spaces, so every dispatched
//! request is recorded here under `(client, frontend request id)` for as
//! long as it is outstanding.

use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RouterError, RouterResult};

/// `(client id, frontend request id)`
pub type CorrelationKey = (String, String);

/// One outstanding dispatched request
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub server: String,
    pub epoch: u64,
    pub backend_request_id: u64,
    pub method: String,
    pub started: Instant,
    /// Cancelling this aborts the backend request
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct CorrelationTable {
    entries: DashMap<CorrelationKey, CorrelationEntry>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outstanding request.
    ///
    /// A frontend request id may only be outstanding once per client.
    pub fn insert(
        &self,
        client: &str,
        request_id: &str,
        entry: CorrelationEntry,
    ) -> RouterResult<()> {
        use dashmap::mapref::entry::Entry;

        match self
            .entries
            .entry((client.to_string(), request_id.to_string()))
        {
            Entry::Occupied(_) => Err(RouterError::InvalidRequest {
                reason: format!("request id {} is already in flight", request_id),
            }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn remove(&self, client: &str, request_id: &str) -> Option<CorrelationEntry> {
        self.entries
            .remove(&(client.to_string(), request_id.to_string()))
            .map(|(_, entry)| entry)
    }

    /// Cancel every outstanding request of a client
    ///
    /// Entries are removed by their owning dispatch once the cancellation
    /// has been observed.
    pub fn cancel_client(&self, client: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.entries.iter().filter(|e| e.key().0 == client) {
            entry.cancel.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!(client = %client, cancelled, "[Correlation] Cancelled client requests");
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
