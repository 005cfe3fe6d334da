use crate::core::{AreaId, QuestId, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Resolves the quest (if any) an area belongs to.
pub trait QuestLookup: Send + Sync {
    fn quest_for_area(&self, area_id: AreaId) -> Option<QuestId>;
}

/// Quest metadata as loaded from the quest table export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: QuestId,
    #[serde(default)]
    pub area_id: Option<AreaId>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Area -> quest map built once at startup.
#[derive(Debug, Clone, Default)]
pub struct QuestAreaMap {
    area_to_quest: HashMap<AreaId, QuestId>,
}

impl QuestAreaMap {
    /// Quests without an area are ignored; a later quest claiming the same
    /// area replaces the earlier one.
    pub fn new(quests: impl IntoIterator<Item = Quest>) -> Self {
        let mut map = Self::default();
        for quest in quests {
            if let Some(area_id) = quest.area_id {
                map.area_to_quest.insert(area_id, quest.id);
            }
        }
        map
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (AreaId, QuestId)>) -> Self {
        Self {
            area_to_quest: pairs.into_iter().collect(),
        }
    }

    /// Parse a JSON array of quests.
    pub fn from_json(raw: &str) -> Result<Self> {
        let quests: Vec<Quest> = serde_json::from_str(raw)
            .map_err(|e| SyncError::Config(format!("invalid quest list: {}", e)))?;
        Ok(Self::new(quests))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.area_to_quest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.area_to_quest.is_empty()
    }
}

impl QuestLookup for QuestAreaMap {
    fn quest_for_area(&self, area_id: AreaId) -> Option<QuestId> {
        self.area_to_quest.get(&area_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_skips_quests_without_area() {
        let map = QuestAreaMap::from_json(
            r#"[{"id": 100, "area_id": 7, "name": "The Pit"}, {"id": 101}]"#,
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.quest_for_area(7), Some(100));
        assert_eq!(map.quest_for_area(8), None);
    }

    #[test]
    fn test_malformed_list_is_a_config_error() {
        assert!(matches!(
            QuestAreaMap::from_json("{"),
            Err(SyncError::Config(_))
        ));
    }
}
