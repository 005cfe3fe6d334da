use crate::core::{
    CompletedSession, EntityId, EntityKind, EventId, OpenSession, PartitionKey, Result, Timestamp,
    TrackedEntity,
};
use crate::worker::CursorUpdate;
use serde::{Deserialize, Serialize};

/// Final snapshot of an entity that left its partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub partition: PartitionKey,
    pub total_level: Option<u32>,
    /// JSON encoding of the snapshot.
    pub snapshot: String,
    pub archived_at: Timestamp,
}

impl ArchiveRecord {
    pub fn from_entity<T: TrackedEntity>(
        partition: &PartitionKey,
        entity: &T,
        archived_at: Timestamp,
    ) -> Result<Self> {
        Ok(Self {
            entity_id: entity.id(),
            kind: T::KIND,
            partition: partition.clone(),
            total_level: entity.total_level(),
            snapshot: serde_json::to_string(entity)?,
            archived_at,
        })
    }

    pub fn decode<T: TrackedEntity>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.snapshot)?)
    }
}

/// Everything one deriver batch writes. Applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCommit {
    pub completed: Vec<CompletedSession>,
    pub opened: Vec<(EntityId, OpenSession)>,
    pub cleared: Vec<EntityId>,
    pub processed: Vec<EventId>,
    pub cursor: Option<CursorUpdate>,
}

impl SessionCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk_insert_sessions(mut self, sessions: impl IntoIterator<Item = CompletedSession>) -> Self {
        self.completed.extend(sessions);
        self
    }

    pub fn mark_events_processed(mut self, event_ids: impl IntoIterator<Item = EventId>) -> Self {
        self.processed.extend(event_ids);
        self
    }

    pub fn set_open(mut self, entity_id: EntityId, session: OpenSession) -> Self {
        self.opened.push((entity_id, session));
        self
    }

    pub fn clear_open(mut self, entity_id: EntityId) -> Self {
        self.cleared.push(entity_id);
        self
    }

    pub fn advance_cursor(mut self, update: CursorUpdate) -> Self {
        self.cursor = Some(update);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
            && self.opened.is_empty()
            && self.cleared.is_empty()
            && self.processed.is_empty()
            && self.cursor.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReceipt {
    pub inserted: usize,
    /// Rows skipped because their (entity, quest, entry) key already existed.
    pub duplicates: usize,
    pub processed: usize,
}

/// Durable "is this entity actively played" verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityClassification {
    pub entity_id: EntityId,
    pub is_active: bool,
    pub score: f64,
    pub checked_at: Timestamp,
}

/// An entity the classifier should (re)compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyCandidate {
    pub entity_id: EntityId,
    /// When the previous verdict was computed, if any.
    pub last_checked: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationCommit {
    pub rows: Vec<ActivityClassification>,
    pub cursor: Option<CursorUpdate>,
}

/// Row counts reported by a single applied write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: usize,
    pub duplicates: usize,
    pub marked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Character;
    use chrono::Utc;

    #[test]
    fn test_archive_record_round_trips_snapshot() {
        let key = PartitionKey::new("cannith", EntityKind::Character);
        let character = Character {
            id: 12,
            total_level: Some(20),
            name: Some("Vex".into()),
            ..Default::default()
        };
        let record = ArchiveRecord::from_entity(&key, &character, Utc::now()).unwrap();
        assert_eq!(record.total_level, Some(20));
        assert_eq!(record.kind, EntityKind::Character);
        assert_eq!(record.decode::<Character>().unwrap(), character);
    }

    #[test]
    fn test_commit_builder() {
        let commit = SessionCommit::new().mark_events_processed([1, 2]).clear_open(5);
        assert!(!commit.is_empty());
        assert_eq!(commit.processed, vec![1, 2]);
        assert!(SessionCommit::new().is_empty());
    }
}
