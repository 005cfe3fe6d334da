use super::partition::diff_partition;
use crate::config::SyncConfig;
use crate::core::{
    ActivityEvent, Clock, EntityId, PartitionKey, Result, SyncError, TrackedEntity,
};
use crate::ingest::{IngestPush, decode_partition};
use crate::registry::PartitionRegistry;
use crate::storage::{ActivitySink, ArchiveRecord, ArchiveStore, PresenceStore};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

/// Summary of one applied partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub key: PartitionKey,
    pub logged_on: Vec<EntityId>,
    pub logged_off: Vec<EntityId>,
    pub events: usize,
    pub archived: usize,
    /// Records rejected by decoding or validation.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    pub push_id: Uuid,
    pub partitions: Vec<PartitionOutcome>,
    /// Partitions named in the push but not registered.
    pub unknown_partitions: Vec<String>,
    pub events: Vec<ActivityEvent>,
}

impl PushOutcome {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn logged_on(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.partitions.iter().flat_map(|p| p.logged_on.iter().copied())
    }

    pub fn logged_off(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.partitions.iter().flat_map(|p| p.logged_off.iter().copied())
    }
}

/// Applies snapshot pushes for one entity kind.
///
/// Pushes touching the same partition are serialized; different partitions
/// proceed concurrently.
pub struct DiffEngine<T: TrackedEntity> {
    registry: Arc<PartitionRegistry>,
    presence: Arc<dyn PresenceStore<T>>,
    sink: Arc<dyn ActivitySink>,
    archive: Arc<dyn ArchiveStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    locks: HashMap<PartitionKey, Arc<Mutex<()>>>,
    _kind: PhantomData<T>,
}

impl<T: TrackedEntity> DiffEngine<T> {
    pub fn new(
        registry: Arc<PartitionRegistry>,
        presence: Arc<dyn PresenceStore<T>>,
        sink: Arc<dyn ActivitySink>,
        archive: Arc<dyn ArchiveStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let locks = registry
            .keys(T::KIND)
            .into_iter()
            .map(|key| (key, Arc::new(Mutex::new(()))))
            .collect();
        Ok(Self {
            registry,
            presence,
            sink,
            archive,
            clock,
            config,
            locks,
            _kind: PhantomData,
        })
    }

    /// Apply every partition of a push.
    ///
    /// Unknown partitions are skipped and reported. A store failure aborts
    /// the push at that partition and leaves its presence and events as they
    /// were; partitions already applied stay applied.
    pub async fn apply_push(&self, push: IngestPush) -> Result<PushOutcome> {
        let push_id = Uuid::new_v4();
        let span = tracing::info_span!("apply_push", %push_id, kind = %T::KIND, mode = ?push.mode);
        self.apply_partitions(push_id, push).instrument(span).await
    }

    async fn apply_partitions(&self, push_id: Uuid, push: IngestPush) -> Result<PushOutcome> {
        let mode = push.mode;
        let mut outcome = PushOutcome {
            push_id,
            ..Default::default()
        };

        for (world, payload) in push.partitions {
            let key = match self.registry.key(&world, T::KIND) {
                Ok(key) => key,
                Err(SyncError::UnknownPartition(name)) => {
                    tracing::warn!(partition = %name, "ignoring unregistered partition");
                    outcome.unknown_partitions.push(world);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let decoded = decode_partition::<T>(&key, payload);

            let lock = self
                .locks
                .get(&key)
                .cloned()
                .ok_or_else(|| SyncError::UnknownPartition(key.to_string()))?;
            let _guard = lock.lock().await;

            let now = self.clock.now();
            let incoming = decoded
                .entities
                .into_iter()
                .map(|(id, mut entity)| {
                    entity.stamp(now);
                    (id, entity)
                })
                .collect();

            let previous = self.presence.get_partition(&key).await?;
            let diff = diff_partition(
                &key,
                &previous,
                incoming,
                &decoded.deleted_ids,
                mode,
                now,
                self.config.history_cap,
            );

            // Archive upserts are idempotent and go first. Presence is restored
            // when the event append fails, so a failed partition keeps neither
            // the new state nor any of its events.
            let archived = diff.archived.len();
            if archived > 0 {
                let records = diff
                    .archived
                    .iter()
                    .map(|entity| ArchiveRecord::from_entity(&key, entity, now))
                    .collect::<Result<Vec<_>>>()?;
                self.archive.archive(records).await?;
            }
            self.presence.replace_partition(&key, diff.state).await?;
            if !diff.events.is_empty()
                && let Err(e) = self.sink.append_all(diff.events.clone()).await
            {
                if let Err(restore) = self.presence.replace_partition(&key, previous).await {
                    tracing::error!(
                        partition = %key,
                        error = %restore,
                        "failed to restore presence after a rejected append"
                    );
                }
                return Err(e);
            }

            tracing::info!(
                partition = %key,
                events = diff.events.len(),
                logged_on = diff.logged_on.len(),
                logged_off = diff.logged_off.len(),
                pruned = diff.pruned,
                skipped = decoded.skipped,
                "partition applied"
            );

            outcome.partitions.push(PartitionOutcome {
                key,
                logged_on: diff.logged_on,
                logged_off: diff.logged_off,
                events: diff.events.len(),
                archived,
                skipped: decoded.skipped,
            });
            outcome.events.extend(diff.events);
        }

        Ok(outcome)
    }
}
