use super::records::{
    ActivityClassification, ArchiveRecord, ClassificationCommit, ClassifyCandidate,
    SessionCommit, SessionReceipt,
};
use crate::core::{
    ActivityEvent, EntityId, EventId, OpenSession, PartitionKey, QuestSession, Result,
    StoredActivity, SyncError, Timestamp, Tracked, TrackedEntity,
};
use crate::worker::{Cursor, CursorKey, Lane, ShardSpec};
use async_trait::async_trait;
use std::collections::HashMap;

/// Authoritative current-state map per partition.
#[async_trait]
pub trait PresenceStore<T: TrackedEntity>: Send + Sync {
    /// Full map for `key`; empty when nothing has been stored yet.
    async fn get_partition(&self, key: &PartitionKey) -> Result<HashMap<EntityId, Tracked<T>>>;

    /// Atomically replace the whole map.
    async fn replace_partition(
        &self,
        key: &PartitionKey,
        entities: HashMap<EntityId, Tracked<T>>,
    ) -> Result<()>;

    /// Upsert the given entities, leaving others untouched.
    async fn merge_partition(
        &self,
        key: &PartitionKey,
        entities: HashMap<EntityId, Tracked<T>>,
    ) -> Result<()>;

    async fn delete_ids(&self, key: &PartitionKey, ids: &[EntityId]) -> Result<usize>;
}

/// Append-only destination of activity events.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Append in order. Returned ids are strictly increasing.
    async fn append_all(&self, events: Vec<ActivityEvent>) -> Result<Vec<EventId>>;

    async fn append(&self, event: ActivityEvent) -> Result<EventId> {
        self.append_all(vec![event])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Storage("append returned no event id".to_string()))
    }
}

/// Read side of the activity log used by the derivers.
#[async_trait]
pub trait ActivityLog: ActivitySink {
    /// Unprocessed session-driving events positioned strictly after `after`,
    /// for entities owned by `shard`, ascending by (timestamp, event_id).
    async fn fetch_unprocessed(
        &self,
        after: (Timestamp, EventId),
        shard: ShardSpec,
        limit: usize,
    ) -> Result<Vec<StoredActivity>>;

    /// Events of the given entities at or after `since`, per entity in replay order.
    async fn events_since(
        &self,
        entity_ids: &[EntityId],
        since: Timestamp,
    ) -> Result<HashMap<EntityId, Vec<StoredActivity>>>;

    async fn timeline(&self, entity_id: EntityId) -> Result<Vec<StoredActivity>>;
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn archive(&self, records: Vec<ArchiveRecord>) -> Result<()>;

    async fn archived(&self, entity_id: EntityId) -> Result<Option<ArchiveRecord>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_open_session(&self, entity_id: EntityId) -> Result<Option<OpenSession>>;

    async fn get_open_sessions(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, OpenSession>>;

    /// Apply a whole batch atomically. Rows whose key already exists are skipped.
    async fn commit_sessions(&self, commit: SessionCommit) -> Result<SessionReceipt>;

    /// Completed sessions of one entity, ordered by entry time.
    async fn sessions_for(&self, entity_id: EntityId) -> Result<Vec<QuestSession>>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, key: &CursorKey) -> Result<Option<Cursor>>;

    /// Record the shard count used by `worker_class`, rejecting a change.
    async fn register_topology(&self, worker_class: &str, shard_count: u32) -> Result<()>;
}

#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Archived characters after `after` owned by `shard`, ascending by id.
    ///
    /// The fresh lane yields entities never classified; the stale lane yields
    /// entities whose last check is older than `stale_before`.
    async fn candidates(
        &self,
        lane: Lane,
        after: EntityId,
        shard: ShardSpec,
        stale_before: Timestamp,
        limit: usize,
    ) -> Result<Vec<ClassifyCandidate>>;

    /// Upsert rows and move the cursor in one step.
    async fn commit_classifications(&self, commit: ClassificationCommit) -> Result<usize>;

    async fn classification(&self, entity_id: EntityId) -> Result<Option<ActivityClassification>>;
}
