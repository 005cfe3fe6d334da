use super::lookup::QuestLookup;
use super::machine::SessionMachine;
use crate::config::{WorkerConfig, window_start};
use crate::core::{Clock, EntityId, Result, StoredActivity};
use crate::storage::{ActivityLog, SessionCommit, SessionStore};
use crate::worker::{BatchJob, Cursor, CursorUpdate, Lane, ShardSpec};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const QUEST_SESSION_WORKER: &str = "quest_sessions";

/// Replays unprocessed status/location events into quest sessions.
///
/// One batch is committed atomically: completed sessions, open-session
/// changes, processed flags and the cursor.
pub struct SessionDeriver {
    log: Arc<dyn ActivityLog>,
    sessions: Arc<dyn SessionStore>,
    lookup: Arc<dyn QuestLookup>,
    clock: Arc<dyn Clock>,
    lookback: chrono::Duration,
}

impl SessionDeriver {
    pub fn new(
        log: Arc<dyn ActivityLog>,
        sessions: Arc<dyn SessionStore>,
        lookup: Arc<dyn QuestLookup>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            log,
            sessions,
            lookup,
            clock,
            lookback: config.lookback()?,
        })
    }

    fn cold_start(&self) -> Result<Cursor> {
        let start = window_start(self.clock.now(), self.lookback)?;
        Ok(Cursor::position(start, 0))
    }

    /// Derive the commit for one batch of events without writing it.
    pub async fn derive(&self, rows: Vec<StoredActivity>) -> Result<SessionCommit> {
        let processed: Vec<_> = rows.iter().map(|row| row.event_id).collect();

        let mut by_entity: BTreeMap<EntityId, Vec<StoredActivity>> = BTreeMap::new();
        for row in rows {
            by_entity.entry(row.entity_id()).or_default().push(row);
        }
        let entity_ids: Vec<EntityId> = by_entity.keys().copied().collect();
        let seeds = self.sessions.get_open_sessions(&entity_ids).await?;

        let mut commit = SessionCommit::new().mark_events_processed(processed);
        let mut out_of_order = 0;

        for (entity_id, mut events) in by_entity {
            events.sort_by_key(StoredActivity::position);

            let mut machine =
                SessionMachine::new(entity_id, self.lookup.as_ref(), seeds.get(&entity_id).copied());
            for event in &events {
                machine.apply(event);
            }
            let outcome = machine.finish();
            out_of_order += outcome.out_of_order;

            commit = commit.bulk_insert_sessions(outcome.completed);
            if outcome.changed {
                commit = match outcome.open {
                    Some(open) => commit.set_open(entity_id, open),
                    None => commit.clear_open(entity_id),
                };
            }
        }

        if out_of_order > 0 {
            tracing::warn!(out_of_order, "skipped events older than their open session");
        }
        Ok(commit)
    }
}

#[async_trait]
impl BatchJob for SessionDeriver {
    type Row = StoredActivity;
    type Output = SessionCommit;

    fn worker_class(&self) -> &'static str {
        QUEST_SESSION_WORKER
    }

    /// Concurrent pushes to different partitions can append an event stamped
    /// slightly behind the cursor. Rescanning the pending set from the cold
    /// start picks such events up.
    fn rescan_on_idle(&self, _lane: Lane) -> bool {
        true
    }

    fn initial_cursor(&self, _lane: Lane) -> Result<Cursor> {
        self.cold_start()
    }

    async fn fetch_batch(
        &self,
        _lane: Lane,
        cursor: Cursor,
        shard: ShardSpec,
        limit: usize,
    ) -> Result<Vec<StoredActivity>> {
        let after = match cursor {
            Cursor::Position {
                timestamp,
                event_id,
            } => (timestamp, event_id),
            Cursor::Start | Cursor::Id { .. } => {
                (window_start(self.clock.now(), self.lookback)?, 0)
            }
        };
        self.log.fetch_unprocessed(after, shard, limit).await
    }

    fn cursor_after(&self, rows: &[StoredActivity]) -> Option<Cursor> {
        rows.iter()
            .map(StoredActivity::position)
            .max()
            .map(|(timestamp, event_id)| Cursor::position(timestamp, event_id))
    }

    async fn compute(&self, _lane: Lane, rows: Vec<StoredActivity>) -> Result<SessionCommit> {
        self.derive(rows).await
    }

    async fn persist(&self, output: SessionCommit, cursor: CursorUpdate) -> Result<usize> {
        let receipt = self
            .sessions
            .commit_sessions(output.advance_cursor(cursor))
            .await?;
        if receipt.duplicates > 0 {
            tracing::info!(
                duplicates = receipt.duplicates,
                "session rows already present, skipped"
            );
        }
        Ok(receipt.inserted)
    }
}
