use super::types::{EntityId, QuestId, Timestamp};
use serde::{Deserialize, Serialize};

/// A derived interval of continuous presence inside a quest's area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestSession {
    pub id: u64,
    pub entity_id: EntityId,
    pub quest_id: QuestId,
    pub entry_timestamp: Timestamp,
    /// `None` while the session is still open.
    pub exit_timestamp: Option<Timestamp>,
}

impl QuestSession {
    pub fn is_open(&self) -> bool {
        self.exit_timestamp.is_none()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.exit_timestamp.map(|exit| exit - self.entry_timestamp)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration()
            .map(|duration| duration.num_milliseconds() as f64 / 1000.0)
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            entity_id: self.entity_id,
            quest_id: self.quest_id,
            entry_timestamp: self.entry_timestamp,
        }
    }
}

/// Uniqueness key of a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub entity_id: EntityId,
    pub quest_id: QuestId,
    pub entry_timestamp: Timestamp,
}

/// The session an entity is currently inside, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub quest_id: QuestId,
    pub entry_timestamp: Timestamp,
}

/// A session closed by the deriver, not yet assigned a row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompletedSession {
    pub entity_id: EntityId,
    pub quest_id: QuestId,
    pub entry_timestamp: Timestamp,
    pub exit_timestamp: Timestamp,
}

impl CompletedSession {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            entity_id: self.entity_id,
            quest_id: self.quest_id,
            entry_timestamp: self.entry_timestamp,
        }
    }

    pub fn into_row(self, id: u64) -> QuestSession {
        QuestSession {
            id,
            entity_id: self.entity_id,
            quest_id: self.quest_id,
            entry_timestamp: self.entry_timestamp,
            exit_timestamp: Some(self.exit_timestamp),
        }
    }
}
