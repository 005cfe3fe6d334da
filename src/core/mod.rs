pub mod activity;
pub mod entity;
pub mod error;
pub mod session;
pub mod types;

pub use activity::{ActivityEvent, ActivityPayload, StoredActivity, TimelineEntry};
pub use entity::{Character, CharacterClass, Lfm, LfmMember, Tracked, TrackedEntity};
pub use error::{Result, SyncError};
pub use session::{CompletedSession, OpenSession, QuestSession, SessionKey};
pub use types::{
    AreaId, Clock, EntityId, EntityKind, EventId, ManualClock, PartitionKey, QuestId, SystemClock,
    Timestamp,
};
