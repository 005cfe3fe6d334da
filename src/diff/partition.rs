use crate::core::{
    ActivityEvent, ActivityPayload, EntityId, PartitionKey, Timestamp, TimelineEntry, Tracked,
    TrackedEntity,
};
use crate::ingest::PushMode;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Result of diffing one partition. Nothing here has been written yet.
#[derive(Debug)]
pub struct PartitionDiff<T> {
    pub key: PartitionKey,
    /// Ordered by entity id; within an entity, in field order.
    pub events: Vec<ActivityEvent>,
    /// Complete new authoritative map for the partition.
    pub state: HashMap<EntityId, Tracked<T>>,
    /// Last known snapshots of confirmed departures.
    pub archived: Vec<T>,
    pub logged_on: Vec<EntityId>,
    pub logged_off: Vec<EntityId>,
    /// Inline history entries dropped by the cap.
    pub pruned: usize,
}

impl<T> PartitionDiff<T> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.archived.is_empty()
    }
}

/// Compare an incoming partition against the previous authoritative map.
///
/// Only ids with prior data can depart: a deleted id that was never seen
/// produces neither an event nor an archive record.
pub fn diff_partition<T: TrackedEntity>(
    key: &PartitionKey,
    previous: &HashMap<EntityId, Tracked<T>>,
    incoming: BTreeMap<EntityId, T>,
    deleted_ids: &BTreeSet<EntityId>,
    mode: PushMode,
    now: Timestamp,
    history_cap: usize,
) -> PartitionDiff<T> {
    let confirmed_departures: BTreeSet<EntityId> = deleted_ids
        .iter()
        .copied()
        .filter(|id| previous.contains_key(id))
        .collect();

    let mut per_entity: BTreeMap<EntityId, Vec<ActivityPayload>> = BTreeMap::new();
    let mut logged_on = Vec::new();

    for (id, entity) in &incoming {
        match previous.get(id) {
            None => {
                logged_on.push(*id);
                per_entity.entry(*id).or_default().push(entity.arrival());
            }
            Some(prior) => {
                let changes = entity.field_changes(&prior.entity);
                if !changes.is_empty() {
                    per_entity.entry(*id).or_default().extend(changes);
                }
            }
        }
    }

    for id in &confirmed_departures {
        let departed = incoming
            .get(id)
            .or_else(|| previous.get(id).map(|tracked| &tracked.entity));
        if let Some(payload) = departed.and_then(T::departure) {
            per_entity.entry(*id).or_default().push(payload);
        }
    }

    let mut state = match mode {
        PushMode::Set => HashMap::with_capacity(incoming.len()),
        PushMode::Update => previous.clone(),
    };

    let mut pruned = 0;
    for (id, entity) in incoming {
        let mut tracked = Tracked {
            entity,
            history: previous
                .get(&id)
                .map(|prior| prior.history.clone())
                .unwrap_or_default(),
        };
        if let Some(payloads) = per_entity.get(&id) {
            let entries = payloads.iter().map(|payload| TimelineEntry {
                timestamp: now,
                payload: payload.clone(),
            });
            pruned += tracked.extend_history(entries, history_cap);
        }
        state.insert(id, tracked);
    }

    let mut archived = Vec::new();
    for id in &confirmed_departures {
        let removed = state.remove(id).map(|tracked| tracked.entity);
        let last_known = removed.or_else(|| previous.get(id).map(|t| t.entity.clone()));
        if T::ARCHIVE_ON_DEPARTURE
            && let Some(entity) = last_known
        {
            archived.push(entity);
        }
    }

    let events = per_entity
        .into_iter()
        .flat_map(|(id, payloads)| {
            payloads
                .into_iter()
                .map(move |payload| ActivityEvent::new(id, key.clone(), now, payload))
        })
        .collect();

    PartitionDiff {
        key: key.clone(),
        events,
        state,
        archived,
        logged_on,
        logged_off: confirmed_departures.into_iter().collect(),
        pruned,
    }
}
