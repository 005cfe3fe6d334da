use super::lookup::QuestLookup;
use crate::core::{
    ActivityPayload, AreaId, CompletedSession, EntityId, OpenSession, StoredActivity, Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoActiveSession,
    ActiveSession(OpenSession),
}

impl SessionState {
    pub fn open(&self) -> Option<OpenSession> {
        match self {
            SessionState::NoActiveSession => None,
            SessionState::ActiveSession(open) => Some(*open),
        }
    }
}

impl From<Option<OpenSession>> for SessionState {
    fn from(open: Option<OpenSession>) -> Self {
        match open {
            Some(open) => SessionState::ActiveSession(open),
            None => SessionState::NoActiveSession,
        }
    }
}

/// What replaying one entity's events produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineOutcome {
    pub completed: Vec<CompletedSession>,
    /// Session still open after the last event.
    pub open: Option<OpenSession>,
    /// Whether `open` differs from the seed the machine started with.
    pub changed: bool,
    /// Events ignored because they predate the active session.
    pub out_of_order: usize,
}

/// Per-entity quest session state machine.
///
/// Events must be fed in (timestamp, event_id) order.
pub struct SessionMachine<'a, L: QuestLookup + ?Sized> {
    entity_id: EntityId,
    lookup: &'a L,
    seed: Option<OpenSession>,
    state: SessionState,
    last_area: Option<AreaId>,
    completed: Vec<CompletedSession>,
    out_of_order: usize,
}

impl<'a, L: QuestLookup + ?Sized> SessionMachine<'a, L> {
    pub fn new(entity_id: EntityId, lookup: &'a L, seed: Option<OpenSession>) -> Self {
        Self {
            entity_id,
            lookup,
            seed,
            state: seed.into(),
            last_area: None,
            completed: Vec::new(),
            out_of_order: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn apply(&mut self, event: &StoredActivity) {
        match event.payload() {
            ActivityPayload::Status { .. } => self.apply_status(),
            ActivityPayload::Location { area_id } => {
                self.apply_location(*area_id, event.timestamp())
            }
            _ => {}
        }
    }

    /// A login or logout ends presence without a measurable exit.
    pub fn apply_status(&mut self) {
        self.state = SessionState::NoActiveSession;
        self.last_area = None;
    }

    pub fn apply_location(&mut self, area_id: AreaId, at: Timestamp) {
        if self.last_area == Some(area_id) {
            return;
        }
        self.last_area = Some(area_id);

        let new_quest = self.lookup.quest_for_area(area_id);

        if let SessionState::ActiveSession(open) = self.state {
            if new_quest == Some(open.quest_id) {
                return;
            }
            if at < open.entry_timestamp {
                tracing::debug!(
                    entity_id = self.entity_id,
                    quest_id = open.quest_id,
                    "skipping location event older than the active session"
                );
                self.out_of_order += 1;
                return;
            }
            self.completed.push(CompletedSession {
                entity_id: self.entity_id,
                quest_id: open.quest_id,
                entry_timestamp: open.entry_timestamp,
                exit_timestamp: at,
            });
            self.state = SessionState::NoActiveSession;
        }

        if let Some(quest_id) = new_quest {
            self.state = SessionState::ActiveSession(OpenSession {
                quest_id,
                entry_timestamp: at,
            });
        }
    }

    pub fn finish(self) -> MachineOutcome {
        let open = self.state.open();
        MachineOutcome {
            completed: self.completed,
            open,
            changed: open != self.seed,
            out_of_order: self.out_of_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::QuestAreaMap;
    use chrono::{Duration, TimeZone, Utc};

    const AREA_A: AreaId = 1;
    const AREA_B: AreaId = 2;
    const AREA_A2: AreaId = 3;

    fn lookup() -> QuestAreaMap {
        QuestAreaMap::from_pairs([(AREA_A, 100), (AREA_A2, 100), (7, 200)])
    }

    fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_enter_leave_enter() {
        let lookup = lookup();
        let mut machine = SessionMachine::new(5, &lookup, None);
        machine.apply_location(AREA_A, t(1));
        machine.apply_location(AREA_B, t(2));
        machine.apply_location(AREA_A, t(3));

        let outcome = machine.finish();
        assert_eq!(
            outcome.completed,
            vec![CompletedSession {
                entity_id: 5,
                quest_id: 100,
                entry_timestamp: t(1),
                exit_timestamp: t(2),
            }]
        );
        assert_eq!(
            outcome.open,
            Some(OpenSession {
                quest_id: 100,
                entry_timestamp: t(3)
            })
        );
        assert!(outcome.changed);
    }

    #[test]
    fn test_same_quest_areas_do_not_split_sessions() {
        let lookup = lookup();
        let mut machine = SessionMachine::new(5, &lookup, None);
        machine.apply_location(AREA_A, t(1));
        machine.apply_location(AREA_A2, t(2));
        machine.apply_location(AREA_A, t(3));
        let outcome = machine.finish();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.open.map(|o| o.entry_timestamp), Some(t(1)));
    }

    #[test]
    fn test_quest_to_quest_closes_and_opens() {
        let lookup = lookup();
        let mut machine = SessionMachine::new(5, &lookup, None);
        machine.apply_location(AREA_A, t(1));
        machine.apply_location(7, t(4));
        let outcome = machine.finish();
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.open.map(|o| o.quest_id), Some(200));
    }

    #[test]
    fn test_status_discards_open_session() {
        let lookup = lookup();
        let seed = OpenSession {
            quest_id: 100,
            entry_timestamp: t(0),
        };
        let mut machine = SessionMachine::new(5, &lookup, Some(seed));
        machine.apply_status();
        let outcome = machine.finish();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.open, None);
        assert!(outcome.changed);
    }

    #[test]
    fn test_unchanged_seed_is_not_reported_as_changed() {
        let lookup = lookup();
        let seed = OpenSession {
            quest_id: 100,
            entry_timestamp: t(0),
        };
        let mut machine = SessionMachine::new(5, &lookup, Some(seed));
        machine.apply_location(AREA_A2, t(5));
        let outcome = machine.finish();
        assert_eq!(outcome.open, Some(seed));
        assert!(!outcome.changed);
    }

    #[test]
    fn test_event_before_entry_is_skipped() {
        let lookup = lookup();
        let seed = OpenSession {
            quest_id: 100,
            entry_timestamp: t(10),
        };
        let mut machine = SessionMachine::new(5, &lookup, Some(seed));
        machine.apply_location(AREA_B, t(5));
        let outcome = machine.finish();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.out_of_order, 1);
        assert_eq!(outcome.open, Some(seed));
    }

    #[test]
    fn test_repeated_area_is_ignored() {
        let lookup = lookup();
        let mut machine = SessionMachine::new(5, &lookup, None);
        machine.apply_location(AREA_B, t(1));
        machine.apply_location(AREA_B, t(2));
        assert_eq!(machine.state(), SessionState::NoActiveSession);
    }
}
