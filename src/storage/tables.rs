use super::persistence::WalEntry;
use super::records::{
    ActivityClassification, ApplyReport, ArchiveRecord, ClassificationCommit, ClassifyCandidate,
    SessionCommit,
};
use crate::core::{
    EntityId, EntityKind, EventId, OpenSession, QuestSession, SessionKey, StoredActivity,
    Timestamp,
};
use crate::worker::{Cursor, CursorKey, CursorUpdate, Lane, ShardSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Every durable table, plus derived indexes rebuilt on load.
///
/// Mutated only through [`DurableTables::apply`], so live writes and log
/// replay produce the same state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurableTables {
    next_event_id: EventId,
    next_session_id: u64,
    activity: BTreeMap<EventId, StoredActivity>,
    sessions: BTreeMap<u64, QuestSession>,
    open_sessions: BTreeMap<EntityId, OpenSession>,
    archive: BTreeMap<EntityId, ArchiveRecord>,
    classifications: BTreeMap<EntityId, ActivityClassification>,
    cursors: BTreeMap<String, Cursor>,
    topology: BTreeMap<String, u32>,

    #[serde(skip)]
    session_index: BTreeSet<SessionKey>,
    /// Unprocessed status/location events of characters in replay order.
    #[serde(skip)]
    pending: BTreeSet<(Timestamp, EventId)>,
    #[serde(skip)]
    by_entity: HashMap<EntityId, Vec<EventId>>,
}

impl DurableTables {
    pub fn rebuild_indexes(&mut self) {
        self.session_index = self.sessions.values().map(QuestSession::key).collect();
        self.pending.clear();
        self.by_entity.clear();
        let stored: Vec<StoredActivity> = self.activity.values().cloned().collect();
        for event in &stored {
            self.index_event(event);
        }
    }

    fn index_event(&mut self, stored: &StoredActivity) {
        if !stored.processed && is_session_input(stored) {
            self.pending.insert(stored.position());
        }
        self.by_entity
            .entry(stored.entity_id())
            .or_default()
            .push(stored.event_id);
    }

    /// Next id the activity log will assign.
    pub fn peek_event_id(&self) -> EventId {
        self.next_event_id.max(1)
    }

    pub fn apply(&mut self, entry: WalEntry) -> ApplyReport {
        match entry {
            WalEntry::AppendActivity { events } => self.apply_append(events),
            WalEntry::Archive { records } => {
                let written = records.len();
                for record in records {
                    self.archive.insert(record.entity_id, record);
                }
                ApplyReport {
                    written,
                    ..Default::default()
                }
            }
            WalEntry::CommitSessions(commit) => self.apply_sessions(commit),
            WalEntry::CommitClassifications(commit) => self.apply_classifications(commit),
            WalEntry::RegisterTopology {
                worker_class,
                shard_count,
            } => {
                self.topology.insert(worker_class, shard_count);
                ApplyReport {
                    written: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn apply_append(&mut self, events: Vec<StoredActivity>) -> ApplyReport {
        let mut report = ApplyReport::default();
        for stored in events {
            if self.activity.contains_key(&stored.event_id) {
                report.duplicates += 1;
                continue;
            }
            self.next_event_id = self.peek_event_id().max(stored.event_id + 1);
            self.index_event(&stored);
            self.activity.insert(stored.event_id, stored);
            report.written += 1;
        }
        report
    }

    fn apply_sessions(&mut self, commit: SessionCommit) -> ApplyReport {
        let mut report = ApplyReport::default();

        for completed in commit.completed {
            if !self.session_index.insert(completed.key()) {
                report.duplicates += 1;
                continue;
            }
            self.next_session_id += 1;
            let id = self.next_session_id;
            self.sessions.insert(id, completed.into_row(id));
            report.written += 1;
        }

        for entity_id in commit.cleared {
            self.open_sessions.remove(&entity_id);
        }
        for (entity_id, session) in commit.opened {
            self.open_sessions.insert(entity_id, session);
        }

        for event_id in commit.processed {
            if let Some(stored) = self.activity.get_mut(&event_id)
                && !stored.processed
            {
                stored.processed = true;
                let position = stored.position();
                self.pending.remove(&position);
                report.marked += 1;
            }
        }

        if let Some(update) = commit.cursor {
            self.set_cursor(update);
        }
        report
    }

    fn apply_classifications(&mut self, commit: ClassificationCommit) -> ApplyReport {
        let written = commit.rows.len();
        for row in commit.rows {
            self.classifications.insert(row.entity_id, row);
        }
        if let Some(update) = commit.cursor {
            self.set_cursor(update);
        }
        ApplyReport {
            written,
            ..Default::default()
        }
    }

    fn set_cursor(&mut self, update: CursorUpdate) {
        self.cursors.insert(update.key.to_string(), update.cursor);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn event(&self, event_id: EventId) -> Option<&StoredActivity> {
        self.activity.get(&event_id)
    }

    pub fn event_count(&self) -> usize {
        self.activity.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn unprocessed_after(
        &self,
        after: (Timestamp, EventId),
        shard: ShardSpec,
        limit: usize,
    ) -> Vec<StoredActivity> {
        self.pending
            .range((Bound::Excluded(after), Bound::Unbounded))
            .filter_map(|(_, event_id)| self.activity.get(event_id))
            .filter(|stored| shard.owns(stored.entity_id()))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Events of one entity at or after `since`, in replay order.
    pub fn entity_events(&self, entity_id: EntityId, since: Option<Timestamp>) -> Vec<StoredActivity> {
        let mut events: Vec<StoredActivity> = self
            .by_entity
            .get(&entity_id)
            .into_iter()
            .flatten()
            .filter_map(|event_id| self.activity.get(event_id))
            .filter(|stored| since.is_none_or(|since| stored.timestamp() >= since))
            .cloned()
            .collect();
        events.sort_by_key(StoredActivity::position);
        events
    }

    pub fn archived(&self, entity_id: EntityId) -> Option<&ArchiveRecord> {
        self.archive.get(&entity_id)
    }

    pub fn archive_count(&self) -> usize {
        self.archive.len()
    }

    pub fn open_session(&self, entity_id: EntityId) -> Option<OpenSession> {
        self.open_sessions.get(&entity_id).copied()
    }

    pub fn open_session_count(&self) -> usize {
        self.open_sessions.len()
    }

    pub fn sessions_for(&self, entity_id: EntityId) -> Vec<QuestSession> {
        let mut sessions: Vec<QuestSession> = self
            .sessions
            .values()
            .filter(|session| session.entity_id == entity_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| (session.entry_timestamp, session.id));
        sessions
    }

    pub fn all_sessions(&self) -> impl Iterator<Item = &QuestSession> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn classification(&self, entity_id: EntityId) -> Option<&ActivityClassification> {
        self.classifications.get(&entity_id)
    }

    pub fn classification_count(&self) -> usize {
        self.classifications.len()
    }

    pub fn candidates(
        &self,
        lane: Lane,
        after: EntityId,
        shard: ShardSpec,
        stale_before: Timestamp,
        limit: usize,
    ) -> Vec<ClassifyCandidate> {
        self.archive
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| record.kind == EntityKind::Character && shard.owns(record.entity_id))
            .filter_map(|record| {
                let previous = self.classifications.get(&record.entity_id);
                let due = match (lane, previous) {
                    (Lane::Fresh, existing) => existing.is_none(),
                    (Lane::Stale, Some(existing)) => existing.checked_at < stale_before,
                    (Lane::Stale, None) => false,
                };
                due.then(|| ClassifyCandidate {
                    entity_id: record.entity_id,
                    last_checked: previous.map(|existing| existing.checked_at),
                })
            })
            .take(limit)
            .collect()
    }

    pub fn cursor(&self, key: &CursorKey) -> Option<Cursor> {
        self.cursors.get(&key.to_string()).copied()
    }

    pub fn topology(&self, worker_class: &str) -> Option<u32> {
        self.topology.get(worker_class).copied()
    }
}

fn is_session_input(stored: &StoredActivity) -> bool {
    stored.event.kind() == EntityKind::Character && stored.payload().drives_sessions()
}
