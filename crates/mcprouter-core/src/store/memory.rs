use async_trait::async_trait;
use parking_lot::RwLock;

use super::ProfileStore;
use crate::{BackendDefinition, Profile, RouterSnapshot};

/// In-process profile store whose snapshot can be replaced at runtime.
#[derive(Default)]
pub struct MemoryProfileStore {
    snapshot: RwLock<RouterSnapshot>,
}

impl MemoryProfileStore {
    pub fn new(snapshot: RouterSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: RouterSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub fn upsert_server(&self, def: BackendDefinition) {
        self.snapshot.write().servers.insert(def.name.clone(), def);
    }

    pub fn remove_server(&self, name: &str) {
        let mut snapshot = self.snapshot.write();
        snapshot.servers.remove(name);
        for profile in snapshot.profiles.values_mut() {
            profile.servers.retain(|s| s != name);
        }
    }

    pub fn upsert_profile(&self, profile: Profile) {
        self.snapshot
            .write()
            .profiles
            .insert(profile.name.clone(), profile);
    }

    pub fn snapshot(&self) -> RouterSnapshot {
        self.snapshot.read().clone()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self) -> anyhow::Result<RouterSnapshot> {
        Ok(self.snapshot())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
