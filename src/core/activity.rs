use super::entity::CharacterClass;
use super::types::{AreaId, EntityId, EntityKind, EventId, PartitionKey, QuestId, Timestamp};
use serde::{Deserialize, Serialize};

/// One semantic change to a tracked entity.
///
/// Every variant carries exactly one fact; a push that changes several
/// watched fields produces several payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActivityPayload {
    /// Character came online (`true`) or logged off (`false`).
    Status { online: bool },
    Location { area_id: AreaId },
    GuildName { name: String },
    TotalLevel {
        total_level: u32,
        classes: Vec<CharacterClass>,
    },
    ServerName { name: String },
    Comment { text: Option<String> },
    /// The quest advertised by an LFM changed.
    Quest { quest_id: Option<QuestId> },
    MemberJoined { name: String },
    MemberLeft { name: String },
    Posted,
}

impl ActivityPayload {
    pub fn tag(&self) -> &'static str {
        match self {
            ActivityPayload::Status { .. } => "status",
            ActivityPayload::Location { .. } => "location",
            ActivityPayload::GuildName { .. } => "guild_name",
            ActivityPayload::TotalLevel { .. } => "total_level",
            ActivityPayload::ServerName { .. } => "server_name",
            ActivityPayload::Comment { .. } => "comment",
            ActivityPayload::Quest { .. } => "quest",
            ActivityPayload::MemberJoined { .. } => "member_joined",
            ActivityPayload::MemberLeft { .. } => "member_left",
            ActivityPayload::Posted => "posted",
        }
    }

    /// Events the quest-session deriver replays.
    pub fn drives_sessions(&self) -> bool {
        matches!(
            self,
            ActivityPayload::Status { .. } | ActivityPayload::Location { .. }
        )
    }
}

/// An activity event as produced by the diff engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub entity_id: EntityId,
    pub partition: PartitionKey,
    /// Assigned by the server at receipt.
    pub timestamp: Timestamp,
    pub payload: ActivityPayload,
}

impl ActivityEvent {
    pub fn new(
        entity_id: EntityId,
        partition: PartitionKey,
        timestamp: Timestamp,
        payload: ActivityPayload,
    ) -> Self {
        Self {
            entity_id,
            partition,
            timestamp,
            payload,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.partition.kind
    }

    pub fn timeline_entry(&self) -> TimelineEntry {
        TimelineEntry {
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        }
    }
}

/// An event after it has been durably appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredActivity {
    pub event_id: EventId,
    pub event: ActivityEvent,
    #[serde(default)]
    pub processed: bool,
}

impl StoredActivity {
    pub fn entity_id(&self) -> EntityId {
        self.event.entity_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.event.timestamp
    }

    pub fn payload(&self) -> &ActivityPayload {
        &self.event.payload
    }

    /// Total order used for replay: timestamp first, append order second.
    pub fn position(&self) -> (Timestamp, EventId) {
        (self.event.timestamp, self.event_id)
    }
}

/// Inline history entry carried on the cached entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: Timestamp,
    pub payload: ActivityPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json_shape_is_tagged() {
        let payload = ActivityPayload::Location { area_id: 7 };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "location");
        assert_eq!(json["data"]["area_id"], 7);

        let posted = serde_json::to_value(ActivityPayload::Posted).unwrap();
        assert_eq!(posted["type"], "posted");
    }

    #[test]
    fn test_session_relevant_payloads() {
        assert!(ActivityPayload::Status { online: true }.drives_sessions());
        assert!(ActivityPayload::Location { area_id: 1 }.drives_sessions());
        assert!(!ActivityPayload::Posted.drives_sessions());
        assert!(
            !ActivityPayload::GuildName {
                name: "Guild".into()
            }
            .drives_sessions()
        );
    }
}
