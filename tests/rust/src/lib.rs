//! Shared test utilities and fixtures for McpRouter integration tests.

pub use mcprouter_core::{DomainEvent, SessionState};

pub use fake_backend::{Behavior, FakeBackend, FakeConnector};

/// Router harness
pub mod harness;
pub use harness::{fast_config, wait_until, RunningRouter, TestRouter};

/// Event testing utilities
pub mod events {
    use mcprouter_core::{DomainEvent, EventReceiver};
    use std::time::Duration;

    /// Collect events from a receiver until `timeout` passes
    pub async fn collect_events(rx: &mut EventReceiver, timeout: Duration) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break, // Bus dropped
                Err(_) => break,   // Timeout
            }
        }

        events
    }

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<DomainEvent>
    where
        F: Fn(&DomainEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }
}
