use crate::core::{ActivityPayload, Character, EntityId, Lfm, LfmMember};
use std::collections::BTreeMap;

const UNKNOWN_MEMBER: &str = "Unknown";

/// Per-field comparison of two snapshots of the same entity.
///
/// Returns one payload per changed watched field, in a fixed field order.
pub trait FieldDiff {
    fn field_changes(&self, previous: &Self) -> Vec<ActivityPayload>;
}

impl FieldDiff for Character {
    fn field_changes(&self, previous: &Self) -> Vec<ActivityPayload> {
        let mut changes = Vec::new();

        // An unset incoming location says nothing; an unset previous one is area 0.
        if let Some(area_id) = self.location_id
            && previous.location_id.unwrap_or(0) != area_id
        {
            changes.push(ActivityPayload::Location { area_id });
        }

        if let Some(guild) = &self.guild_name
            && previous.guild_name.as_ref() != Some(guild)
        {
            changes.push(ActivityPayload::GuildName {
                name: guild.clone(),
            });
        }

        if let Some(level) = self.total_level
            && previous.total_level != Some(level)
        {
            changes.push(ActivityPayload::TotalLevel {
                total_level: level,
                classes: self.classes.clone(),
            });
        }

        if let Some(server) = &self.server_name
            && previous.server_name.as_ref() != Some(server)
        {
            changes.push(ActivityPayload::ServerName {
                name: server.clone(),
            });
        }

        changes
    }
}

impl FieldDiff for Lfm {
    fn field_changes(&self, previous: &Self) -> Vec<ActivityPayload> {
        let mut changes = Vec::new();

        if self.quest_id != previous.quest_id {
            changes.push(ActivityPayload::Quest {
                quest_id: self.quest_id,
            });
        }

        if self.comment != previous.comment {
            changes.push(ActivityPayload::Comment {
                text: self.comment.clone(),
            });
        }

        let before = roster(&previous.members);
        let after = roster(&self.members);

        for (id, name) in &before {
            if !after.contains_key(id) {
                changes.push(ActivityPayload::MemberLeft {
                    name: name.clone(),
                });
            }
        }
        for (id, name) in &after {
            if !before.contains_key(id) {
                changes.push(ActivityPayload::MemberJoined {
                    name: name.clone(),
                });
            }
        }

        changes
    }
}

fn roster(members: &[LfmMember]) -> BTreeMap<EntityId, String> {
    members
        .iter()
        .map(|member| {
            let name = member
                .name
                .clone()
                .unwrap_or_else(|| UNKNOWN_MEMBER.to_string());
            (member.id, name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CharacterClass;

    fn character(location: Option<u64>, guild: Option<&str>) -> Character {
        Character {
            id: 1,
            location_id: location,
            guild_name: guild.map(str::to_string),
            ..Default::default()
        }
    }

    fn member(id: u64, name: Option<&str>) -> LfmMember {
        LfmMember {
            id,
            name: name.map(str::to_string),
            total_level: None,
        }
    }

    #[test]
    fn test_single_field_change_yields_single_event() {
        let previous = character(Some(10), Some("X"));
        let current = character(Some(11), Some("X"));
        assert_eq!(
            current.field_changes(&previous),
            vec![ActivityPayload::Location { area_id: 11 }]
        );
    }

    #[test]
    fn test_unset_incoming_fields_are_not_changes() {
        let previous = character(Some(10), Some("X"));
        let current = character(None, None);
        assert!(current.field_changes(&previous).is_empty());
    }

    #[test]
    fn test_unset_previous_location_compares_as_zero() {
        let previous = character(None, None);
        assert_eq!(
            character(Some(4), None).field_changes(&previous),
            vec![ActivityPayload::Location { area_id: 4 }]
        );
        assert!(character(Some(0), None).field_changes(&previous).is_empty());
    }

    #[test]
    fn test_level_change_carries_classes() {
        let previous = Character {
            id: 1,
            total_level: Some(5),
            ..Default::default()
        };
        let classes = vec![CharacterClass {
            name: "Wizard".into(),
            level: 6,
        }];
        let current = Character {
            id: 1,
            total_level: Some(6),
            classes: classes.clone(),
            ..Default::default()
        };
        assert_eq!(
            current.field_changes(&previous),
            vec![ActivityPayload::TotalLevel {
                total_level: 6,
                classes
            }]
        );
    }

    #[test]
    fn test_lfm_roster_changes() {
        let previous = Lfm {
            id: 5,
            quest_id: Some(100),
            comment: Some("LF healer".into()),
            members: vec![member(1, Some("Ana")), member(2, None)],
            ..Default::default()
        };
        let current = Lfm {
            id: 5,
            quest_id: Some(100),
            comment: Some("LF healer".into()),
            members: vec![member(1, Some("Ana")), member(3, Some("Cid"))],
            ..Default::default()
        };
        assert_eq!(
            current.field_changes(&previous),
            vec![
                ActivityPayload::MemberLeft {
                    name: "Unknown".into()
                },
                ActivityPayload::MemberJoined { name: "Cid".into() },
            ]
        );
    }

    #[test]
    fn test_lfm_quest_and_comment_changes() {
        let previous = Lfm {
            id: 5,
            quest_id: Some(100),
            ..Default::default()
        };
        let current = Lfm {
            id: 5,
            quest_id: None,
            comment: Some("anything".into()),
            ..Default::default()
        };
        assert_eq!(
            current.field_changes(&previous),
            vec![
                ActivityPayload::Quest { quest_id: None },
                ActivityPayload::Comment {
                    text: Some("anything".into())
                },
            ]
        );
    }
}
