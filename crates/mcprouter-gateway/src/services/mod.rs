//! Gateway services
//!
//! - **ProfileResolverService**: profile name -> reachable backends
//! - **ConfigWatcher**: reconciles the Profile Store with running sessions

mod config_watcher;
mod profile_resolver;

pub use config_watcher::{ConfigWatcher, ConfigWatcherHandle, ReconcileReport};
pub use profile_resolver::ProfileResolverService;
