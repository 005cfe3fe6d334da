//! Explicit description of every presence-store key the system owns.
//!
//! Each registered world gets one key per entity kind. Keys are fixed at
//! startup; pushes naming anything else are rejected partition by partition.

use crate::core::{EntityKind, PartitionKey, Result, SyncError};
use std::collections::BTreeSet;

pub const DEFAULT_WORLDS: [&str; 13] = [
    "Argonnessen",
    "Cannith",
    "Ghallanda",
    "Khyber",
    "Orien",
    "Sarlona",
    "Thelanis",
    "Wayfinder",
    "Hardcore",
    "Cormyr",
    "Shadowdale",
    "Thrane",
    "Moonsea",
];

#[derive(Debug, Clone)]
pub struct PartitionRegistry {
    worlds: BTreeSet<String>,
}

impl PartitionRegistry {
    /// Build and validate a registry. World names are case-insensitive.
    pub fn new<I, S>(worlds: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for world in worlds {
            let name = world.as_ref().trim().to_lowercase();
            if name.is_empty() {
                return Err(SyncError::Config("empty partition name".to_string()));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(SyncError::Config(format!(
                    "partition name '{}' contains characters not allowed in store keys",
                    name
                )));
            }
            if !set.insert(name.clone()) {
                return Err(SyncError::Config(format!(
                    "partition '{}' registered twice",
                    name
                )));
            }
        }
        if set.is_empty() {
            return Err(SyncError::Config(
                "at least one partition must be registered".to_string(),
            ));
        }
        Ok(Self { worlds: set })
    }

    pub fn default_worlds() -> Self {
        Self {
            worlds: DEFAULT_WORLDS.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Resolve a world name from a push into its store key.
    pub fn key(&self, world: &str, kind: EntityKind) -> Result<PartitionKey> {
        let name = world.trim().to_lowercase();
        if self.worlds.contains(&name) {
            Ok(PartitionKey::new(name, kind))
        } else {
            Err(SyncError::UnknownPartition(world.to_string()))
        }
    }

    pub fn keys(&self, kind: EntityKind) -> Vec<PartitionKey> {
        self.worlds
            .iter()
            .map(|world| PartitionKey::new(world.clone(), kind))
            .collect()
    }
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self::default_worlds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_case_insensitively() {
        let registry = PartitionRegistry::default_worlds();
        let key = registry.key("Thelanis", EntityKind::Character).unwrap();
        assert_eq!(key.to_string(), "thelanis:characters");
        assert!(matches!(
            registry.key("Atlantis", EntityKind::Lfm),
            Err(SyncError::UnknownPartition(_))
        ));
    }

    #[test]
    fn test_registry_rejects_bad_configuration() {
        assert!(PartitionRegistry::new(Vec::<String>::new()).is_err());
        assert!(PartitionRegistry::new(["alpha", "Alpha"]).is_err());
        assert!(PartitionRegistry::new(["bad:name"]).is_err());
        assert!(PartitionRegistry::new(["alpha", "beta"]).is_ok());
    }

    #[test]
    fn test_keys_are_per_kind() {
        let registry = PartitionRegistry::new(["alpha", "beta"]).unwrap();
        let keys: Vec<String> = registry
            .keys(EntityKind::Lfm)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec!["alpha:lfms", "beta:lfms"]);
    }
}
