//! # McpRouter Core Library
//!
//! Domain types shared by the router crates.
//!
//! ## Modules
//!
//! - `branding` - Product naming and default constants
//! - `domain` - Backend definitions, profiles, router configuration, events
//! - `store` - Profile Store trait with JSON-file and in-memory implementations
//! - `event_bus` - Central event distribution system

pub mod branding;
pub mod domain;
pub mod event_bus;
pub mod store;

// Re-export commonly used types
pub use domain::*;
pub use store::{JsonFileProfileStore, MemoryProfileStore, ProfileStore};

// Event-driven architecture exports
pub use event_bus::{
    create_shared_event_bus, EventBus, EventReceiver, EventSender, Received, SharedEventBus,
};
