use crate::core::{EntityId, EventId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling lane of a batch job. Lanes are scanned in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Rows whose derived result has aged past the staleness threshold.
    Stale,
    /// Rows never processed, or the forward-only event stream.
    Fresh,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Stale => "stale",
            Lane::Fresh => "fresh",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted resume point of one lane of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Nothing processed yet.
    Start,
    /// Last processed event in replay order.
    Position {
        timestamp: Timestamp,
        event_id: EventId,
    },
    /// Last processed entity id.
    Id { entity_id: EntityId },
}

impl Cursor {
    pub fn position(timestamp: Timestamp, event_id: EventId) -> Self {
        Cursor::Position {
            timestamp,
            event_id,
        }
    }

    pub fn id(entity_id: EntityId) -> Self {
        Cursor::Id { entity_id }
    }

    /// Last processed entity id, or 0 before the first batch.
    pub fn last_id(&self) -> EntityId {
        match self {
            Cursor::Id { entity_id } => *entity_id,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CursorKey {
    pub worker_class: String,
    pub shard_index: u32,
    pub lane: Lane,
}

impl CursorKey {
    pub fn new(worker_class: &str, shard_index: u32, lane: Lane) -> Self {
        Self {
            worker_class: worker_class.to_string(),
            shard_index,
            lane,
        }
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.worker_class, self.shard_index, self.lane)
    }
}

/// Cursor move committed together with the output of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub key: CursorKey,
    pub cursor: Cursor,
}

impl CursorUpdate {
    pub fn new(key: CursorKey, cursor: Cursor) -> Self {
        Self { key, cursor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_key_display() {
        let key = CursorKey::new("quest_sessions", 2, Lane::Fresh);
        assert_eq!(key.to_string(), "quest_sessions/2/fresh");
    }

    #[test]
    fn test_last_id() {
        assert_eq!(Cursor::Start.last_id(), 0);
        assert_eq!(Cursor::id(41).last_id(), 41);
    }
}
