use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use worldsync::classify::ACTIVITY_CLASSIFIER;
use worldsync::storage::{ActivitySink, ArchiveRecord, ArchiveStore, ClassificationStore};
use worldsync::worker::{Cursor, CursorKey, Lane};
use worldsync::{
    ActivityClassifier, ActivityEvent, ActivityPayload, BatchRunner, Character, Clock,
    DurableStore, EntityId, EntityKind, ManualClock, PartitionKey, Timestamp, WorkerConfig,
};

fn t(minutes: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn key() -> PartitionKey {
    PartitionKey::new("sarlona", EntityKind::Character)
}

fn event(entity_id: EntityId, minutes: i64, payload: ActivityPayload) -> ActivityEvent {
    ActivityEvent::new(entity_id, key(), t(minutes), payload)
}

fn level(entity_id: EntityId, minutes: i64, total_level: u32) -> ActivityEvent {
    event(
        entity_id,
        minutes,
        ActivityPayload::TotalLevel {
            total_level,
            classes: Vec::new(),
        },
    )
}

async fn archive(store: &DurableStore, ids: &[EntityId]) {
    let records = ids
        .iter()
        .map(|id| {
            let character = Character {
                id: *id,
                ..Default::default()
            };
            ArchiveRecord::from_entity(&key(), &character, t(0)).unwrap()
        })
        .collect();
    store.archive(records).await.unwrap();
}

/// Entity 1 is levelling through varied areas, entity 2 sits in a bank at a
/// suspicious level, entity 3 has no recorded activity.
async fn seeded_store() -> Arc<DurableStore> {
    let store = Arc::new(DurableStore::in_memory());
    let mut events = vec![
        level(1, 0, 10),
        event(1, 0, ActivityPayload::Status { online: true }),
        event(1, 5, ActivityPayload::Location { area_id: 100 }),
        level(1, 20, 11),
        event(1, 30, ActivityPayload::Location { area_id: 200 }),
        level(1, 50, 12),
        event(1, 60, ActivityPayload::Location { area_id: 300 }),
        level(1, 90, 13),
        event(1, 120, ActivityPayload::Status { online: false }),
    ];
    events.extend([
        level(2, 0, 4),
        event(2, 0, ActivityPayload::Status { online: true }),
        event(2, 1, ActivityPayload::Location { area_id: 10 }),
        event(2, 3, ActivityPayload::Status { online: false }),
    ]);
    store.append_all(events).await.unwrap();
    archive(&store, &[1, 2, 3]).await;
    store
}

fn config() -> WorkerConfig {
    WorkerConfig::new()
        .batch_size(2)
        .lookback_window(std::time::Duration::from_secs(30 * 86_400))
        .staleness_threshold(std::time::Duration::from_secs(7 * 86_400))
}

async fn runner(
    store: &Arc<DurableStore>,
    clock: &Arc<ManualClock>,
    config: WorkerConfig,
) -> BatchRunner<ActivityClassifier> {
    let job = ActivityClassifier::new(store.clone(), store.clone(), clock.clone(), &config).unwrap();
    BatchRunner::start(job, store.clone(), config).await.unwrap()
}

#[tokio::test]
async fn test_backfill_classifies_every_archived_character() {
    let store = seeded_store().await;
    let clock = Arc::new(ManualClock::new(t(24 * 60)));

    let summary = runner(&store, &clock, config()).await.run_once().await.unwrap();
    assert_eq!(summary.written, 3);
    assert_eq!(summary.batches, 2);

    let active = store.classification(1).await.unwrap().unwrap();
    assert!(active.is_active);
    assert_eq!(active.score, 1.0);
    assert_eq!(active.checked_at, t(24 * 60));

    let mule = store.classification(2).await.unwrap().unwrap();
    assert!(!mule.is_active);

    let silent = store.classification(3).await.unwrap().unwrap();
    assert!(!silent.is_active);
    assert_eq!(silent.score, 0.0);

    let fresh = CursorKey::new(ACTIVITY_CLASSIFIER, 0, Lane::Fresh);
    assert_eq!(store.tables().await.cursor(&fresh), Some(Cursor::id(3)));
}

#[tokio::test]
async fn test_stale_rows_are_refreshed_first() {
    let store = seeded_store().await;
    let clock = Arc::new(ManualClock::new(t(24 * 60)));
    runner(&store, &clock, config()).await.run_once().await.unwrap();

    // Nothing is due a day later.
    clock.advance(Duration::days(1));
    let summary = runner(&store, &clock, config()).await.run_once().await.unwrap();
    assert_eq!(summary.batches, 0);

    // A newly archived character and expired results.
    archive(&store, &[4]).await;
    clock.advance(Duration::days(7));
    let r = runner(&store, &clock, config()).await;

    let first = r.next_batch().await.unwrap().unwrap();
    assert_eq!(first.lane, Lane::Stale);
    assert_eq!(first.rows, 2);

    let summary = r.run_once().await.unwrap();
    assert_eq!(summary.rows, 2);

    for id in 1..=4 {
        let row = store.classification(id).await.unwrap().unwrap();
        assert_eq!(row.checked_at, clock.now());
    }
    assert!(store.classification(1).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_shards_split_candidates() {
    let store = seeded_store().await;
    let clock = Arc::new(ManualClock::new(t(24 * 60)));

    let mut written = 0;
    for index in 0..2 {
        let summary = runner(&store, &clock, config().shard(index, 2))
            .await
            .run_once()
            .await
            .unwrap();
        written += summary.written;
    }
    assert_eq!(written, 3);
    assert_eq!(store.tables().await.classification_count(), 3);
}
