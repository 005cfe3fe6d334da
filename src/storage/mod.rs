pub mod contracts;
pub mod durable;
pub mod persistence;
pub mod presence;
pub mod records;
pub mod tables;

pub use contracts::{
    ActivityLog, ActivitySink, ArchiveStore, ClassificationStore, CursorStore, PresenceStore,
    SessionStore,
};
pub use durable::DurableStore;
pub use persistence::{DurabilityMode, PersistenceManager, SnapshotManager, WalEntry, WalManager};
pub use presence::InMemoryPresenceStore;
pub use records::{
    ActivityClassification, ApplyReport, ArchiveRecord, ClassificationCommit, ClassifyCandidate,
    SessionCommit, SessionReceipt,
};
pub use tables::DurableTables;
