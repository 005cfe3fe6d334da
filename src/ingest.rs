//! Collector push wire shape.
//!
//! ```json
//! { "mode": "update",
//!   "partitions": { "Thelanis": { "data": [ {...}, ... ], "deleted_ids": [4, 9] } } }
//! ```
//!
//! Entities are kept as raw JSON until a partition is processed so one
//! malformed record can be skipped without rejecting the rest of the push.

use crate::core::{EntityId, PartitionKey, Result, SyncError, TrackedEntity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMode {
    /// The push is the complete state of each named partition.
    Set,
    /// The push only mentions entities that changed.
    Update,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionPayload {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub deleted_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPush {
    pub mode: PushMode,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionPayload>,
}

impl IngestPush {
    pub fn new(mode: PushMode) -> Self {
        Self {
            mode,
            partitions: BTreeMap::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::Validation(format!("malformed push envelope: {}", e)))
    }

    /// Add a partition from typed entities.
    pub fn partition<T: Serialize>(
        mut self,
        world: &str,
        entities: &[T],
        deleted_ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<Self> {
        let data = entities
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.partitions.insert(
            world.to_string(),
            PartitionPayload {
                data,
                deleted_ids: deleted_ids.into_iter().collect(),
            },
        );
        Ok(self)
    }

    /// Add a partition from raw JSON records.
    pub fn raw_partition(
        mut self,
        world: &str,
        data: Vec<serde_json::Value>,
        deleted_ids: impl IntoIterator<Item = EntityId>,
    ) -> Self {
        self.partitions.insert(
            world.to_string(),
            PartitionPayload {
                data,
                deleted_ids: deleted_ids.into_iter().collect(),
            },
        );
        self
    }
}

/// Entities decoded from one partition payload.
#[derive(Debug)]
pub struct DecodedPartition<T> {
    pub entities: BTreeMap<EntityId, T>,
    pub deleted_ids: BTreeSet<EntityId>,
    pub skipped: usize,
}

/// Decode and validate each record independently. Failures are logged and
/// counted, never propagated.
pub fn decode_partition<T: TrackedEntity>(
    key: &PartitionKey,
    payload: PartitionPayload,
) -> DecodedPartition<T> {
    let mut entities = BTreeMap::new();
    let mut skipped = 0;

    for (position, raw) in payload.data.into_iter().enumerate() {
        let raw_id = raw.get("id").cloned();
        let decoded = serde_json::from_value::<T>(raw)
            .map_err(|e| SyncError::Validation(e.to_string()))
            .and_then(|entity| entity.validate().map(|_| entity));

        match decoded {
            Ok(entity) => {
                entities.insert(entity.id(), entity);
            }
            Err(err) => {
                skipped += 1;
                warn!(
                    partition = %key,
                    position,
                    id = ?raw_id,
                    error = %err,
                    "skipping malformed entity"
                );
            }
        }
    }

    DecodedPartition {
        entities,
        deleted_ids: payload.deleted_ids.into_iter().collect(),
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Character, EntityKind};
    use serde_json::json;

    #[test]
    fn test_envelope_parses() {
        let push = IngestPush::from_json(
            r#"{"mode":"set","partitions":{"Khyber":{"data":[{"id":1}],"deleted_ids":[2]}}}"#,
        )
        .unwrap();
        assert_eq!(push.mode, PushMode::Set);
        assert_eq!(push.partitions["Khyber"].deleted_ids, vec![2]);
        assert!(IngestPush::from_json(r#"{"mode":"merge"}"#).is_err());
    }

    #[test]
    fn test_malformed_entities_are_skipped_individually() {
        let key = PartitionKey::new("khyber", EntityKind::Character);
        let payload = PartitionPayload {
            data: vec![
                json!({"id": 1, "location_id": 5}),
                json!({"id": "not-a-number"}),
                json!({"name": "no id"}),
                json!({"id": 0}),
                json!({"id": 2, "total_level": 10}),
            ],
            deleted_ids: vec![3, 3],
        };
        let decoded = decode_partition::<Character>(&key, payload);
        assert_eq!(decoded.entities.len(), 2);
        assert_eq!(decoded.skipped, 3);
        assert_eq!(decoded.deleted_ids.len(), 1);
        assert_eq!(decoded.entities[&1].location_id, Some(5));
    }
}
