use crate::core::{EntityId, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One instance's slice of the id space: `id % count == index`.
///
/// A given entity always maps to exactly one shard for a fixed `count`, so
/// its whole event stream is handled by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardSpec {
    index: u32,
    count: u32,
}

impl ShardSpec {
    pub fn new(index: u32, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(SyncError::ShardMisconfigured(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if index >= count {
            return Err(SyncError::ShardMisconfigured(format!(
                "shard_index {} is outside shard_count {}",
                index, count
            )));
        }
        Ok(Self { index, count })
    }

    /// The whole id space as one shard.
    pub fn single() -> Self {
        Self { index: 0, count: 1 }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn owns(&self, id: EntityId) -> bool {
        shard_for(id, self.count) == self.index
    }

    /// Every shard of a topology, in index order.
    pub fn all(count: u32) -> Result<Vec<ShardSpec>> {
        (0..count.max(1))
            .map(|index| ShardSpec::new(index, count))
            .collect()
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

/// Shard owning `id` under a topology of `shard_count` shards.
pub fn shard_for(id: EntityId, shard_count: u32) -> u32 {
    if shard_count == 0 {
        return 0;
    }
    (id % shard_count as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shards_partition_the_id_space() {
        for count in 1..=7u32 {
            let shards = ShardSpec::all(count).unwrap();
            let mut seen = HashSet::new();
            for id in 0..500u64 {
                let owners: Vec<_> = shards.iter().filter(|s| s.owns(id)).collect();
                assert_eq!(owners.len(), 1, "id {} owned by {:?}", id, owners);
                seen.insert(id);
            }
            assert_eq!(seen.len(), 500);
        }
    }

    #[test]
    fn test_invalid_specs_are_rejected() {
        assert!(ShardSpec::new(0, 0).is_err());
        assert!(ShardSpec::new(3, 3).is_err());
        assert_eq!(ShardSpec::new(2, 3).unwrap().to_string(), "2/3");
    }
}
