use super::contracts::{
    ActivityLog, ActivitySink, ArchiveStore, ClassificationStore, CursorStore, SessionStore,
};
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use super::records::{
    ActivityClassification, ApplyReport, ArchiveRecord, ClassificationCommit, ClassifyCandidate,
    SessionCommit, SessionReceipt,
};
use super::tables::DurableTables;
use crate::core::{
    ActivityEvent, EntityId, EventId, OpenSession, QuestSession, Result, StoredActivity,
    SyncError, Timestamp,
};
use crate::worker::{Cursor, CursorKey, Lane, ShardSpec};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{RwLock, RwLockReadGuard};

struct Inner {
    tables: DurableTables,
    persistence: Option<PersistenceManager>,
}

impl Inner {
    /// Log first, then apply. A failed log write leaves memory untouched.
    fn commit(&mut self, entry: WalEntry) -> Result<ApplyReport> {
        if let Some(persistence) = self.persistence.as_mut() {
            persistence.log(&entry)?;
        }
        let label = entry.label();
        let report = self.tables.apply(entry);
        tracing::debug!(entry = label, written = report.written, "applied");

        if let Some(persistence) = self.persistence.as_mut()
            && persistence.needs_checkpoint()
            && let Err(e) = persistence.checkpoint(&self.tables)
        {
            log::warn!("Checkpoint failed, the log keeps growing: {}", e);
        }
        Ok(report)
    }
}

/// Activity log, archive, session, classification and cursor tables behind
/// one lock, made durable by a write-ahead log and periodic snapshots.
pub struct DurableStore {
    inner: RwLock<Inner>,
}

impl DurableStore {
    /// A store with no backing directory.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use worldsync::storage::ActivitySink;
    /// use worldsync::{ActivityEvent, ActivityPayload, DurableStore, EntityKind, PartitionKey};
    ///
    /// let store = DurableStore::in_memory();
    /// let key = PartitionKey::new("khyber", EntityKind::Character);
    /// let event = ActivityEvent::new(7, key, chrono::Utc::now(), ActivityPayload::Status { online: true });
    /// assert_eq!(store.append(event).await.unwrap(), 1);
    /// # });
    /// ```
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tables: DurableTables::default(),
                persistence: None,
            }),
        }
    }

    /// Open (or create) a data directory, replaying whatever the log holds.
    pub fn open<P: AsRef<Path>>(data_dir: P, mode: DurabilityMode) -> Result<Self> {
        let mut persistence = PersistenceManager::new(data_dir.as_ref(), mode)?;
        let recovery = persistence.recover()?;
        if recovery.replayed > 0 || recovery.torn_tail {
            log::info!(
                "Recovered {} log entries from {}",
                recovery.replayed,
                data_dir.as_ref().display()
            );
            persistence.checkpoint(&recovery.tables)?;
        }
        Ok(Self {
            inner: RwLock::new(Inner {
                tables: recovery.tables,
                persistence: Some(persistence),
            }),
        })
    }

    pub async fn set_checkpoint_threshold(&self, threshold: usize) {
        let mut inner = self.inner.write().await;
        if let Some(persistence) = inner.persistence.as_mut() {
            persistence.wal_mut().set_checkpoint_threshold(threshold);
        }
    }

    pub async fn checkpoint(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        match inner.persistence.as_mut() {
            Some(persistence) => persistence.checkpoint(&inner.tables),
            None => Ok(()),
        }
    }

    /// Read access to the tables for inspection.
    pub async fn tables(&self) -> RwLockReadGuard<'_, DurableTables> {
        RwLockReadGuard::map(self.inner.read().await, |inner| &inner.tables)
    }
}

#[async_trait]
impl ActivitySink for DurableStore {
    async fn append_all(&self, events: Vec<ActivityEvent>) -> Result<Vec<EventId>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.write().await;
        let first = inner.tables.peek_event_id();
        let stored: Vec<StoredActivity> = events
            .into_iter()
            .zip(first..)
            .map(|(event, event_id)| StoredActivity {
                event_id,
                event,
                processed: false,
            })
            .collect();
        let ids = stored.iter().map(|s| s.event_id).collect();
        inner.commit(WalEntry::AppendActivity { events: stored })?;
        Ok(ids)
    }
}

#[async_trait]
impl ActivityLog for DurableStore {
    async fn fetch_unprocessed(
        &self,
        after: (Timestamp, EventId),
        shard: ShardSpec,
        limit: usize,
    ) -> Result<Vec<StoredActivity>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.unprocessed_after(after, shard, limit))
    }

    async fn events_since(
        &self,
        entity_ids: &[EntityId],
        since: Timestamp,
    ) -> Result<HashMap<EntityId, Vec<StoredActivity>>> {
        let inner = self.inner.read().await;
        Ok(entity_ids
            .iter()
            .map(|id| (*id, inner.tables.entity_events(*id, Some(since))))
            .collect())
    }

    async fn timeline(&self, entity_id: EntityId) -> Result<Vec<StoredActivity>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.entity_events(entity_id, None))
    }
}

#[async_trait]
impl ArchiveStore for DurableStore {
    async fn archive(&self, records: Vec<ArchiveRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().await;
        inner.commit(WalEntry::Archive { records })?;
        Ok(())
    }

    async fn archived(&self, entity_id: EntityId) -> Result<Option<ArchiveRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.archived(entity_id).cloned())
    }
}

#[async_trait]
impl SessionStore for DurableStore {
    async fn get_open_session(&self, entity_id: EntityId) -> Result<Option<OpenSession>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.open_session(entity_id))
    }

    async fn get_open_sessions(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, OpenSession>> {
        let inner = self.inner.read().await;
        Ok(entity_ids
            .iter()
            .filter_map(|id| inner.tables.open_session(*id).map(|open| (*id, open)))
            .collect())
    }

    async fn commit_sessions(&self, commit: SessionCommit) -> Result<SessionReceipt> {
        if commit.is_empty() {
            return Ok(SessionReceipt::default());
        }
        let mut inner = self.inner.write().await;
        let report = inner.commit(WalEntry::CommitSessions(commit))?;
        Ok(SessionReceipt {
            inserted: report.written,
            duplicates: report.duplicates,
            processed: report.marked,
        })
    }

    async fn sessions_for(&self, entity_id: EntityId) -> Result<Vec<QuestSession>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.sessions_for(entity_id))
    }
}

#[async_trait]
impl CursorStore for DurableStore {
    async fn load_cursor(&self, key: &CursorKey) -> Result<Option<Cursor>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.cursor(key))
    }

    async fn register_topology(&self, worker_class: &str, shard_count: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.tables.topology(worker_class) {
            Some(existing) if existing == shard_count => Ok(()),
            Some(existing) => Err(SyncError::ShardMisconfigured(format!(
                "{} cursors were written with {} shards, refusing to run with {}",
                worker_class, existing, shard_count
            ))),
            None => {
                inner.commit(WalEntry::RegisterTopology {
                    worker_class: worker_class.to_string(),
                    shard_count,
                })?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ClassificationStore for DurableStore {
    async fn candidates(
        &self,
        lane: Lane,
        after: EntityId,
        shard: ShardSpec,
        stale_before: Timestamp,
        limit: usize,
    ) -> Result<Vec<ClassifyCandidate>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.candidates(lane, after, shard, stale_before, limit))
    }

    async fn commit_classifications(&self, commit: ClassificationCommit) -> Result<usize> {
        if commit.rows.is_empty() && commit.cursor.is_none() {
            return Ok(0);
        }
        let mut inner = self.inner.write().await;
        let report = inner.commit(WalEntry::CommitClassifications(commit))?;
        Ok(report.written)
    }

    async fn classification(&self, entity_id: EntityId) -> Result<Option<ActivityClassification>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.classification(entity_id).cloned())
    }
}
