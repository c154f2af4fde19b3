//! Profile Store - the external source of desired backend and profile sets
//!
//! The router treats a store as read-only data. Implementations must return a
//! complete snapshot on every `load`; diffing against running state is the
//! config watcher's job.

mod json_file;
mod memory;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::RouterSnapshot;

pub use json_file::{JsonFileProfileStore, ProfilesDocument};
pub use memory::MemoryProfileStore;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Read the current desired state
    async fn load(&self) -> anyhow::Result<RouterSnapshot>;

    /// Path to watch for change notifications, if the store is file-backed
    fn watch_path(&self) -> Option<PathBuf> {
        None
    }

    /// Short description for logging
    fn describe(&self) -> String;
}
