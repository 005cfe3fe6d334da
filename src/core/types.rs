use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

pub type EntityId = u64;
pub type AreaId = u64;
pub type QuestId = u64;
pub type EventId = u64;
pub type Timestamp = DateTime<Utc>;

/// Which family of tracked records a partition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Lfm,
}

impl EntityKind {
    /// Suffix used in store keys, e.g. `thelanis:characters`.
    pub fn store_suffix(&self) -> &'static str {
        match self {
            EntityKind::Character => "characters",
            EntityKind::Lfm => "lfms",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_suffix())
    }
}

/// Key of one authoritative map in the presence store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub world: String,
    pub kind: EntityKind,
}

impl PartitionKey {
    pub fn new(world: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            world: world.into().to_lowercase(),
            kind,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.world, self.kind)
    }
}

/// Source of server-assigned timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = at;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partition_key_display_is_lowercase() {
        let key = PartitionKey::new("Thelanis", EntityKind::Character);
        assert_eq!(key.to_string(), "thelanis:characters");
        assert_eq!(PartitionKey::new("Khyber", EntityKind::Lfm).to_string(), "khyber:lfms");
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
