//! Profile Resolution Service
//!
//! Determines which backends a frontend client may reach. Clients are bound
//! to a profile *name*; the servers behind it are resolved on every request,
//! so a reloaded profile takes effect without reconnecting.

use std::collections::BTreeMap;
use std::sync::Arc;

use mcprouter_core::Profile;
use parking_lot::RwLock;
use tracing::info;

use crate::error::{RouterError, RouterResult};

pub struct ProfileResolverService {
    profiles: RwLock<Arc<BTreeMap<String, Profile>>>,
    default_profile: String,
}

impl ProfileResolverService {
    pub fn new(default_profile: impl Into<String>) -> Self {
        Self {
            profiles: RwLock::new(Arc::new(BTreeMap::new())),
            default_profile: default_profile.into(),
        }
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Replace the whole profile set. Returns true if anything changed.
    pub fn publish(&self, profiles: BTreeMap<String, Profile>) -> bool {
        let mut current = self.profiles.write();
        if **current == profiles {
            return false;
        }
        info!(
            profiles = ?profiles.keys().collect::<Vec<_>>(),
            "[ProfileResolver] Profiles published"
        );
        *current = Arc::new(profiles);
        true
    }

    /// Pick the profile for a connecting client
    pub fn resolve(&self, requested: Option<&str>) -> RouterResult<Profile> {
        let name = requested
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_profile);
        self.profiles
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::InvalidRequest {
                reason: format!("unknown profile '{}'", name),
            })
    }

    /// Current backends of a profile; empty if the profile was removed
    pub fn servers(&self, profile: &str) -> Arc<Vec<String>> {
        Arc::new(
            self.profiles
                .read()
                .get(profile)
                .map(|p| p.servers.clone())
                .unwrap_or_default(),
        )
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }
}
