// ============================================================================
// worldsync Library
// ============================================================================
//
// Snapshot diffing, activity timelines and quest-session derivation for a
// game-world population feed.

pub mod classify;
pub mod config;
pub mod core;
pub mod diff;
pub mod ingest;
pub mod quest;
pub mod registry;
pub mod storage;
pub mod worker;

pub use crate::core::{
    ActivityEvent, ActivityPayload, Character, CharacterClass, Clock, CompletedSession, EntityId,
    EntityKind, EventId, Lfm, LfmMember, ManualClock, OpenSession, PartitionKey, QuestSession,
    Result, StoredActivity, SyncError, SystemClock, Timestamp, Tracked, TrackedEntity,
};
pub use classify::{ActivityClassifier, ScoreModel};
pub use config::{SyncConfig, WorkerConfig};
pub use diff::{DiffEngine, PushOutcome};
pub use ingest::{IngestPush, PushMode};
pub use quest::{QuestAreaMap, QuestLookup, SessionDeriver};
pub use registry::PartitionRegistry;
pub use storage::{DurabilityMode, DurableStore, InMemoryPresenceStore};
pub use worker::{BatchJob, BatchRunner, BatchWorker, ShardSpec};
