use super::activity::{ActivityPayload, TimelineEntry};
use super::error::{Result, SyncError};
use super::types::{AreaId, EntityId, EntityKind, QuestId, Timestamp};
use crate::diff::FieldDiff;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterClass {
    pub name: String,
    pub level: u32,
}

/// Latest known state of a player character.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Character {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default)]
    pub total_level: Option<u32>,
    #[serde(default)]
    pub classes: Vec<CharacterClass>,
    #[serde(default)]
    pub location_id: Option<AreaId>,
    #[serde(default)]
    pub guild_name: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub home_server_name: Option<String>,
    #[serde(default)]
    pub group_id: Option<u64>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub is_in_party: Option<bool>,
    #[serde(default)]
    pub is_anonymous: Option<bool>,
    #[serde(default)]
    pub is_recruiting: Option<bool>,
    #[serde(default)]
    pub public_comment: Option<String>,
    /// Server-assigned; anything the collector sends here is overwritten.
    #[serde(default)]
    pub last_update: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LfmMember {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_level: Option<u32>,
}

/// A "looking for more" roster post.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lfm {
    pub id: EntityId,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub quest_id: Option<QuestId>,
    #[serde(default)]
    pub is_quest_guess: Option<bool>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub accepted_classes: Vec<String>,
    #[serde(default)]
    pub minimum_level: Option<u32>,
    #[serde(default)]
    pub maximum_level: Option<u32>,
    #[serde(default)]
    pub adventure_active_time: Option<u64>,
    #[serde(default)]
    pub leader: Option<LfmMember>,
    #[serde(default)]
    pub members: Vec<LfmMember>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub last_update: Option<Timestamp>,
}

/// Behaviour the diff engine needs from a cached record type.
pub trait TrackedEntity:
    FieldDiff + Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Whether the last snapshot is written to durable storage on departure.
    const ARCHIVE_ON_DEPARTURE: bool;

    fn id(&self) -> EntityId;

    /// Overwrite the receipt timestamp.
    fn stamp(&mut self, at: Timestamp);

    /// Event emitted when the id first appears in a partition.
    fn arrival(&self) -> ActivityPayload;

    /// Event emitted when a confirmed deletion removes the id.
    fn departure(&self) -> Option<ActivityPayload>;

    fn total_level(&self) -> Option<u32> {
        None
    }

    fn validate(&self) -> Result<()> {
        if self.id() == 0 {
            return Err(SyncError::Validation(format!(
                "{} record has reserved id 0",
                Self::KIND
            )));
        }
        Ok(())
    }
}

impl TrackedEntity for Character {
    const KIND: EntityKind = EntityKind::Character;
    const ARCHIVE_ON_DEPARTURE: bool = true;

    fn id(&self) -> EntityId {
        self.id
    }

    fn stamp(&mut self, at: Timestamp) {
        self.last_update = Some(at);
    }

    fn arrival(&self) -> ActivityPayload {
        ActivityPayload::Status { online: true }
    }

    fn departure(&self) -> Option<ActivityPayload> {
        Some(ActivityPayload::Status { online: false })
    }

    fn total_level(&self) -> Option<u32> {
        self.total_level
    }

    fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(SyncError::Validation(
                "character record has reserved id 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl TrackedEntity for Lfm {
    const KIND: EntityKind = EntityKind::Lfm;
    const ARCHIVE_ON_DEPARTURE: bool = false;

    fn id(&self) -> EntityId {
        self.id
    }

    fn stamp(&mut self, at: Timestamp) {
        self.last_update = Some(at);
    }

    fn arrival(&self) -> ActivityPayload {
        ActivityPayload::Posted
    }

    fn departure(&self) -> Option<ActivityPayload> {
        None
    }
}

/// What the presence store holds per id: the snapshot plus its
/// carried-forward, bounded activity history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<T> {
    pub entity: T,
    #[serde(default)]
    pub history: Vec<TimelineEntry>,
}

impl<T> Tracked<T> {
    pub fn new(entity: T) -> Self {
        Self {
            entity,
            history: Vec::new(),
        }
    }

    /// Append entries and drop the oldest beyond `cap`. Returns how many were pruned.
    pub fn extend_history(&mut self, entries: impl IntoIterator<Item = TimelineEntry>, cap: usize) -> usize {
        self.history.extend(entries);
        let overflow = self.history.len().saturating_sub(cap);
        if overflow > 0 {
            self.history.drain(..overflow);
        }
        overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_history_is_bounded() {
        let mut tracked = Tracked::new(Character {
            id: 1,
            ..Default::default()
        });
        let now = Utc::now();
        let entries = (0..5).map(|i| TimelineEntry {
            timestamp: now,
            payload: ActivityPayload::Location { area_id: i },
        });
        let pruned = tracked.extend_history(entries, 3);
        assert_eq!(pruned, 2);
        assert_eq!(tracked.history.len(), 3);
        assert_eq!(
            tracked.history[0].payload,
            ActivityPayload::Location { area_id: 2 }
        );
    }

    #[test]
    fn test_character_validation_only_rejects_reserved_id() {
        let character = Character {
            id: 9,
            total_level: Some(3),
            classes: vec![CharacterClass {
                name: "Fighter".into(),
                level: 5,
            }],
            ..Default::default()
        };
        // Collectors report class levels and total level independently.
        assert!(character.validate().is_ok());

        let zero = Character::default();
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_lfm_deserializes_with_missing_fields() {
        let lfm: Lfm = serde_json::from_str(r#"{"id": 44, "comment": "need healer"}"#).unwrap();
        assert_eq!(lfm.id, 44);
        assert!(lfm.members.is_empty());
        assert_eq!(lfm.arrival(), ActivityPayload::Posted);
        assert!(lfm.departure().is_none());
    }
}
