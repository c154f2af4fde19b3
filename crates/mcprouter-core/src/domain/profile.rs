//! Profiles and the desired-state snapshot read from a Profile Store

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::BackendDefinition;

/// A named, ordered set of backend server references.
///
/// A server may belong to any number of profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub servers: Vec<String>,
}

impl Profile {
    /// Build a profile, dropping repeated server names (first occurrence wins)
    pub fn new<I, S>(name: impl Into<String>, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let servers = servers
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| seen.insert(s.clone()))
            .collect();
        Self {
            name: name.into(),
            servers,
        }
    }

    pub fn contains(&self, server: &str) -> bool {
        self.servers.iter().any(|s| s == server)
    }
}

/// Desired backend and profile sets at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterSnapshot {
    pub servers: BTreeMap<String, BackendDefinition>,
    pub profiles: BTreeMap<String, Profile>,
}

impl RouterSnapshot {
    pub fn with_server(mut self, def: BackendDefinition) -> Self {
        self.servers.insert(def.name.clone(), def);
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Every enabled backend referenced by at least one profile.
    ///
    /// Servers that are defined but not referenced by any profile are not
    /// part of the desired running set.
    pub fn desired_backends(&self) -> BTreeMap<String, BackendDefinition> {
        let referenced: BTreeSet<&str> = self
            .profiles
            .values()
            .flat_map(|p| p.servers.iter().map(String::as_str))
            .collect();

        self.servers
            .iter()
            .filter(|(name, def)| !def.disabled && referenced.contains(name.as_str()))
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect()
    }

    /// Profile references that point at undefined servers, as `(profile, server)`
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        self.profiles
            .values()
            .flat_map(|p| {
                p.servers
                    .iter()
                    .filter(|s| !self.servers.contains_key(s.as_str()))
                    .map(move |s| (p.name.clone(), s.clone()))
            })
            .collect()
    }
}
