//! Event consumers
//!
//! Components that subscribe to DomainEvents and act on them.

mod mcp_notifier;
mod queue;

pub use mcp_notifier::{ClientSink, MCPNotifier};
pub use queue::{ListKind, Outbound, OutboundQueue, PushOutcome};
