use super::contracts::PresenceStore;
use super::persistence::SnapshotManager;
use crate::core::{EntityId, PartitionKey, Result, SyncError, Tracked, TrackedEntity};
use crate::registry::PartitionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

type Partition<T> = HashMap<EntityId, Tracked<T>>;

/// In-process presence store with one lock per partition.
///
/// The set of partitions is fixed at construction from the registry; a key
/// outside it is an error rather than an implicit create.
pub struct InMemoryPresenceStore<T> {
    partitions: HashMap<PartitionKey, Arc<RwLock<Partition<T>>>>,
}

#[derive(Serialize, Deserialize)]
struct PresenceImage<T> {
    partitions: BTreeMap<String, Vec<Tracked<T>>>,
}

impl<T: TrackedEntity> InMemoryPresenceStore<T> {
    pub fn new(registry: &PartitionRegistry) -> Self {
        let partitions = registry
            .keys(T::KIND)
            .into_iter()
            .map(|key| (key, Arc::new(RwLock::new(HashMap::new()))))
            .collect();
        Self { partitions }
    }

    fn handle(&self, key: &PartitionKey) -> Result<Arc<RwLock<Partition<T>>>> {
        self.partitions
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownPartition(key.to_string()))
    }

    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self.partitions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self, key: &PartitionKey) -> Result<usize> {
        let handle = self.handle(key)?;
        let partition = handle.read().await;
        Ok(partition.len())
    }

    /// Write every partition to a snapshot file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut image = PresenceImage {
            partitions: BTreeMap::new(),
        };
        for key in self.partition_keys() {
            let handle = self.handle(&key)?;
            let partition = handle.read().await;
            let mut entities: Vec<_> = partition.values().cloned().collect();
            entities.sort_by_key(|tracked| tracked.entity.id());
            image.partitions.insert(key.to_string(), entities);
        }
        SnapshotManager::new(path).save(&image)
    }

    /// Restore partitions from a snapshot file, if one exists.
    ///
    /// Partitions in the file that are not registered are dropped with a warning.
    pub async fn load(&self, path: &Path) -> Result<usize> {
        let Some(image) = SnapshotManager::<PresenceImage<T>>::new(path).load()? else {
            return Ok(0);
        };

        let mut restored = 0;
        for (name, entities) in image.partitions {
            let Some(key) = self.partitions.keys().find(|key| key.to_string() == name).cloned()
            else {
                log::warn!("Skipping unregistered partition '{}' in presence snapshot", name);
                continue;
            };
            let handle = self.handle(&key)?;
            let mut partition = handle.write().await;
            restored += entities.len();
            *partition = entities
                .into_iter()
                .map(|tracked| (tracked.entity.id(), tracked))
                .collect();
        }
        Ok(restored)
    }
}

#[async_trait]
impl<T: TrackedEntity> PresenceStore<T> for InMemoryPresenceStore<T> {
    async fn get_partition(&self, key: &PartitionKey) -> Result<Partition<T>> {
        let handle = self.handle(key)?;
        let partition = handle.read().await;
        Ok(partition.clone())
    }

    async fn replace_partition(&self, key: &PartitionKey, entities: Partition<T>) -> Result<()> {
        let handle = self.handle(key)?;
        let mut partition = handle.write().await;
        *partition = entities;
        Ok(())
    }

    async fn merge_partition(&self, key: &PartitionKey, entities: Partition<T>) -> Result<()> {
        let handle = self.handle(key)?;
        let mut partition = handle.write().await;
        partition.extend(entities);
        Ok(())
    }

    async fn delete_ids(&self, key: &PartitionKey, ids: &[EntityId]) -> Result<usize> {
        let handle = self.handle(key)?;
        let mut partition = handle.write().await;
        Ok(ids.iter().filter(|id| partition.remove(id).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Character, EntityKind, Lfm};
    use tempfile::TempDir;

    fn registry() -> PartitionRegistry {
        PartitionRegistry::new(["Argonnessen", "Cannith"]).unwrap()
    }

    fn tracked(id: EntityId) -> (EntityId, Tracked<Character>) {
        (
            id,
            Tracked::new(Character {
                id,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_unknown_partition_is_rejected() {
        let store = InMemoryPresenceStore::<Character>::new(&registry());
        let key = PartitionKey::new("khyber", EntityKind::Character);
        assert!(matches!(
            store.get_partition(&key).await,
            Err(SyncError::UnknownPartition(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_merge_delete() {
        let store = InMemoryPresenceStore::<Character>::new(&registry());
        let key = PartitionKey::new("cannith", EntityKind::Character);

        store
            .replace_partition(&key, [tracked(1), tracked(2)].into_iter().collect())
            .await
            .unwrap();
        store
            .merge_partition(&key, [tracked(3)].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(store.len(&key).await.unwrap(), 3);

        let removed = store.delete_ids(&key, &[2, 9]).await.unwrap();
        assert_eq!(removed, 1);
        let partition = store.get_partition(&key).await.unwrap();
        assert!(!partition.contains_key(&2));

        store.replace_partition(&key, HashMap::new()).await.unwrap();
        assert_eq!(store.len(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kinds_are_separate_keyspaces() {
        let lfms = InMemoryPresenceStore::<Lfm>::new(&registry());
        let character_key = PartitionKey::new("cannith", EntityKind::Character);
        assert!(lfms.get_partition(&character_key).await.is_err());
        assert_eq!(lfms.partition_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("characters.snapshot");
        let key = PartitionKey::new("argonnessen", EntityKind::Character);

        let store = InMemoryPresenceStore::<Character>::new(&registry());
        store
            .replace_partition(&key, [tracked(4), tracked(5)].into_iter().collect())
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let restored = InMemoryPresenceStore::<Character>::new(&registry());
        assert_eq!(restored.load(&path).await.unwrap(), 2);
        assert!(restored.get(&key, 5).await.unwrap().is_some());
    }
}
