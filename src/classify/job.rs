use super::score::ScoreModel;
use crate::config::{WorkerConfig, window_start};
use crate::core::{Clock, EntityId, Result};
use crate::storage::{
    ActivityClassification, ActivityLog, ClassificationCommit, ClassificationStore,
    ClassifyCandidate,
};
use crate::worker::{BatchJob, Cursor, CursorUpdate, Lane, ShardSpec};
use async_trait::async_trait;
use std::sync::Arc;

pub const ACTIVITY_CLASSIFIER: &str = "activity_classifier";

/// Backfills and refreshes the per-entity "is active" classification.
pub struct ActivityClassifier {
    store: Arc<dyn ClassificationStore>,
    log: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    model: ScoreModel,
    lookback: chrono::Duration,
    staleness: chrono::Duration,
}

impl ActivityClassifier {
    pub fn new(
        store: Arc<dyn ClassificationStore>,
        log: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            log,
            clock,
            model: ScoreModel::default(),
            lookback: config.lookback()?,
            staleness: config.staleness()?,
        })
    }
}

#[async_trait]
impl BatchJob for ActivityClassifier {
    type Row = ClassifyCandidate;
    type Output = Vec<ActivityClassification>;

    fn worker_class(&self) -> &'static str {
        ACTIVITY_CLASSIFIER
    }

    fn lanes(&self) -> Vec<Lane> {
        vec![Lane::Stale, Lane::Fresh]
    }

    fn rescan_on_idle(&self, _lane: Lane) -> bool {
        true
    }

    fn initial_cursor(&self, _lane: Lane) -> Result<Cursor> {
        Ok(Cursor::Start)
    }

    async fn fetch_batch(
        &self,
        lane: Lane,
        cursor: Cursor,
        shard: ShardSpec,
        limit: usize,
    ) -> Result<Vec<ClassifyCandidate>> {
        let stale_before = window_start(self.clock.now(), self.staleness)?;
        self.store
            .candidates(lane, cursor.last_id(), shard, stale_before, limit)
            .await
    }

    fn cursor_after(&self, rows: &[ClassifyCandidate]) -> Option<Cursor> {
        rows.iter()
            .map(|candidate| candidate.entity_id)
            .max()
            .map(Cursor::id)
    }

    async fn compute(
        &self,
        lane: Lane,
        rows: Vec<ClassifyCandidate>,
    ) -> Result<Vec<ActivityClassification>> {
        let now = self.clock.now();
        let ids: Vec<EntityId> = rows.iter().map(|candidate| candidate.entity_id).collect();
        let since = window_start(now, self.lookback)?;
        let activity = self.log.events_since(&ids, since).await?;

        let classified: Vec<ActivityClassification> = rows
            .iter()
            .map(|candidate| {
                let events = activity
                    .get(&candidate.entity_id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let score = self.model.score(events);
                ActivityClassification {
                    entity_id: candidate.entity_id,
                    is_active: score.is_active(self.model.active_threshold),
                    score: score.score,
                    checked_at: now,
                }
            })
            .collect();

        let active = classified.iter().filter(|row| row.is_active).count();
        tracing::debug!(%lane, classified = classified.len(), active, "classified batch");
        Ok(classified)
    }

    async fn persist(
        &self,
        output: Vec<ActivityClassification>,
        cursor: CursorUpdate,
    ) -> Result<usize> {
        self.store
            .commit_classifications(ClassificationCommit {
                rows: output,
                cursor: Some(cursor),
            })
            .await
    }
}
