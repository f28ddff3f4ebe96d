use super::*;
use crate::storage::{MemoryStore, NewRecord, RecordUpdate, SqliteStore};
use chrono::{DateTime, FixedOffset, TimeZone};
use std::collections::BTreeSet;
use tempfile::tempdir;

fn day(s: &str) -> DayKey {
    DayKey::parse(s).unwrap()
}

/// `day` at `hour`:00 in UTC+2
fn at(day: DayKey, hour: u32) -> DateTime<FixedOffset> {
    let naive = day.to_date().and_hms_opt(hour, 0, 0).unwrap();
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .from_local_datetime(&naive)
        .unwrap()
}

fn test_config() -> EngineConfig {
    EngineConfig {
        window_days: 30,
        backfill_chunk_days: 30,
        yield_every: 4,
        ..Default::default()
    }
}

/// Engine over `store` with `today` pinned; no bootstrap yet
async fn cold_engine(store: &MemoryStore, today: DayKey) -> (Engine, FixedClock) {
    let clock = FixedClock::new(today);
    let engine = Engine::builder(store)
        .config(EngineConfig {
            bootstrap_on_open: false,
            ..test_config()
        })
        .clock(Arc::new(clock.clone()))
        .yield_point(Arc::new(NoYield))
        .open()
        .await
        .unwrap();
    engine
        .register_entity(EntityConfig::new("walk", "Walk"))
        .unwrap();
    engine
        .register_entity(EntityConfig::new("read", "Reading"))
        .unwrap();
    (engine, clock)
}

/// Bootstrapped engine with `today` pinned
async fn ready_engine(today: DayKey) -> (Engine, MemoryStore) {
    let store = MemoryStore::new();
    let (engine, _) = cold_engine(&store, today).await;
    engine.initialize().await.unwrap();
    (engine, store)
}

async fn reopen(store: &MemoryStore, clock: &FixedClock) -> Engine {
    Engine::builder(store)
        .config(test_config())
        .clock(Arc::new(clock.clone()))
        .yield_point(Arc::new(NoYield))
        .open()
        .await
        .unwrap()
}

async fn add(engine: &Engine, entity: &str, day: DayKey, hour: u32, duration: i64) -> Record {
    engine
        .create_record(NewRecord::new(entity, at(day, hour)).duration(duration))
        .await
        .unwrap()
}

fn ids(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn test_summary_follows_inserts_and_deletes() {
    let store = MemoryStore::new();
    let today = day("20240105");
    let (engine, _) = cold_engine(&store, today).await;
    let d = day("20240101");

    add(&engine, "walk", d, 8, 10).await;
    let middle = add(&engine, "walk", d, 9, 20).await;
    add(&engine, "walk", d, 10, 30).await;
    engine.initialize().await.unwrap();

    let summary = engine.get_daily_summary("walk", d).await.unwrap();
    assert_eq!(summary.total_count, 3);
    assert_eq!(summary.total_duration, 60);

    assert!(engine.delete_record(&middle.id).await.unwrap());
    let summary = engine.get_daily_summary("walk", d).await.unwrap();
    assert_eq!(summary.total_count, 2);
    assert_eq!(summary.total_duration, 40);

    assert!(!engine.delete_record(&middle.id).await.unwrap());
    assert!(engine.read_stats().indexed >= 2);
}

#[tokio::test]
async fn test_bootstrap_indexes_recent_window_only() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, _) = cold_engine(&store, today).await;

    let old = add(&engine, "walk", today.add_days(-50), 12, 5).await;
    let recent = add(&engine, "walk", today.add_days(-3), 12, 5).await;
    engine.initialize().await.unwrap();

    let meta = engine.index_meta().unwrap();
    assert_eq!(meta.indexed_from, Some(today.add_days(-29)));
    assert_eq!(meta.oldest_data, Some(today.add_days(-50)));
    assert_eq!(meta.last_indexed, Some(today));
    assert!(!meta.backfill_complete);

    // Only the recent record made it into the indexes
    let indexed = engine.indexes.dates().get_set(recent.day_key).unwrap();
    assert_eq!(indexed, vec![recent.id.clone()]);
    assert!(engine.indexes.dates().get_set(old.day_key).unwrap().is_empty());

    // But reads of the old day still find it
    let found = engine.get_by_day_key(old.day_key).await.unwrap();
    assert_eq!(ids(&found), vec![old.id.as_str()]);
}

#[tokio::test]
async fn test_bootstrap_without_old_data_is_complete() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;

    let status = engine.optimization_status().unwrap();
    assert!(status.ready);
    assert!(status.backfill_complete);
    assert!(!status.using_scan_fallback);
    assert_eq!(status.indexed_from_day_key, Some(today.add_days(-29)));
    assert_eq!(status.oldest_data_day_key, None);
}

#[tokio::test]
async fn test_verify_empty_store_is_consistent() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;

    let report = engine.verify_integrity().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.records_checked, 0);
    assert_eq!(report.verified_from, Some(today.add_days(-29)));

    let status = engine.optimization_status().unwrap();
    assert!(!status.using_scan_fallback);
    assert!(!status.rebuild_needed);
    assert!(engine.get_by_day_key(today).await.unwrap().is_empty());
    assert_eq!(engine.read_stats().indexed, 1);
}

#[tokio::test]
async fn test_backfill_walks_back_in_chunks() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, _) = cold_engine(&store, today).await;

    let old = add(&engine, "walk", today.add_days(-50), 12, 15).await;
    add(&engine, "walk", today, 12, 5).await;
    engine.initialize().await.unwrap();

    assert!(engine.backfill_next_chunk(10).await.unwrap());
    let meta = engine.index_meta().unwrap();
    assert_eq!(meta.indexed_from, Some(today.add_days(-39)));
    assert!(!meta.backfill_complete);
    assert_eq!(
        engine.next_backfill_range(10).unwrap(),
        Some((today.add_days(-49), today.add_days(-40)))
    );

    assert!(engine.backfill_next_chunk(10).await.unwrap());
    assert_eq!(engine.index_meta().unwrap().indexed_from, Some(today.add_days(-49)));

    // Last chunk is clipped at the oldest data
    assert!(engine.backfill_next_chunk(10).await.unwrap());
    let meta = engine.index_meta().unwrap();
    assert_eq!(meta.indexed_from, Some(today.add_days(-50)));
    assert!(meta.backfill_complete);
    assert_eq!(engine.backfill_remaining_days().unwrap(), Some(0));

    // Idempotent once complete
    assert!(!engine.backfill_next_chunk(10).await.unwrap());
    assert!(!engine.backfill_next_chunk(10).await.unwrap());
    assert_eq!(engine.index_meta().unwrap().indexed_from, Some(today.add_days(-50)));

    assert_eq!(
        engine.indexes.dates().get_set(old.day_key).unwrap(),
        vec![old.id.clone()]
    );
    let summary = engine.get_daily_summary("walk", old.day_key).await.unwrap();
    assert_eq!(summary.total_count, 1);
    assert_eq!(summary.total_duration, 15);

    let report = engine.verify_integrity().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.records_checked, 2);
}

#[tokio::test]
async fn test_run_backfill_merges_into_existing_rows() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, _) = cold_engine(&store, today).await;

    for offset in [35, 70, 120, 200] {
        add(&engine, "read", today.add_days(-offset), 20, 30).await;
    }
    engine.initialize().await.unwrap();

    let chunks = engine.run_backfill(30).await.unwrap();
    assert_eq!(chunks, 6);
    assert!(engine.index_meta().unwrap().backfill_complete);
    assert_eq!(engine.run_backfill(30).await.unwrap(), 0);

    let rows = engine
        .get_daily_summary_range(SummaryScope::All, today.add_days(-365), today)
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.values().all(|s| s.total_count == 1 && s.total_duration == 30));
}

#[tokio::test]
async fn test_zero_chunk_is_rejected() {
    let (engine, _store) = ready_engine(day("20240301")).await;
    let err = engine.backfill_next_chunk(0).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidChunkSize(0)));
}

#[tokio::test]
async fn test_backfill_skipped_before_initialize() {
    let store = MemoryStore::new();
    let (engine, _) = cold_engine(&store, day("20240301")).await;
    assert!(!engine.backfill_next_chunk(10).await.unwrap());
    assert!(!engine.optimization_status().unwrap().ready);
}

#[tokio::test]
async fn test_pause_blocks_backfill_and_persists() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, clock) = cold_engine(&store, today).await;
    add(&engine, "walk", today.add_days(-90), 12, 5).await;
    engine.initialize().await.unwrap();

    engine.set_backfill_paused(true).unwrap();
    assert!(!engine.backfill_next_chunk(30).await.unwrap());
    assert!(engine.optimization_status().unwrap().paused);
    drop(engine);

    // Paused flag survives a reopen
    let engine = reopen(&store, &clock).await;
    assert!(engine.optimization_status().unwrap().paused);

    engine.set_backfill_paused(false).unwrap();
    assert!(engine.backfill_next_chunk(30).await.unwrap());
}

#[tokio::test]
async fn test_old_insert_reopens_backfill() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    add(&engine, "walk", today, 9, 10).await;
    assert!(engine.index_meta().unwrap().backfill_complete);

    let old_day = today.add_days(-100);
    let old = add(&engine, "walk", old_day, 9, 10).await;

    let meta = engine.index_meta().unwrap();
    assert_eq!(meta.oldest_data, Some(old_day));
    assert!(!meta.backfill_complete);
    assert!(engine.indexes.dates().get_set(old_day).unwrap().is_empty());

    let scanned_before = engine.read_stats().scanned;
    let found = engine.get_by_day_key(old_day).await.unwrap();
    assert_eq!(ids(&found), vec![old.id.as_str()]);
    assert_eq!(engine.read_stats().scanned, scanned_before + 1);

    engine.run_backfill(30).await.unwrap();
    assert!(engine.index_meta().unwrap().backfill_complete);
    assert_eq!(
        engine.indexes.dates().get_set(old_day).unwrap(),
        vec![old.id.clone()]
    );
}

#[tokio::test]
async fn test_insert_inside_window_advances_last_indexed() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    let tomorrow = today.add_days(1);

    let future = add(&engine, "walk", tomorrow, 7, 5).await;
    let meta = engine.index_meta().unwrap();
    assert_eq!(meta.last_indexed, Some(tomorrow));
    assert_eq!(meta.oldest_data, Some(tomorrow));
    assert_eq!(
        engine.indexes.dates().get_set(tomorrow).unwrap(),
        vec![future.id.clone()]
    );

    // Days after today are outside the indexed read range, so they scan
    let found = engine.get_by_day_key(tomorrow).await.unwrap();
    assert_eq!(ids(&found), vec![future.id.as_str()]);
}

#[tokio::test]
async fn test_update_moves_record_between_buckets() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    let yesterday = today.pred();

    let record = add(&engine, "walk", today, 8, 25).await;
    let updated = engine
        .update_record(&record.id, RecordUpdate::new().occurred_at(at(yesterday, 22)).entity("read"))
        .await
        .unwrap();
    assert_eq!(updated.day_key, yesterday);
    assert_eq!(updated.created_at, record.created_at);

    assert!(engine.get_by_day_key(today).await.unwrap().is_empty());
    assert_eq!(
        ids(&engine.get_by_day_key(yesterday).await.unwrap()),
        vec![record.id.as_str()]
    );

    assert_eq!(engine.get_daily_summary("walk", today).await.unwrap().total_count, 0);
    let moved = engine.get_daily_summary("read", yesterday).await.unwrap();
    assert_eq!(moved.total_count, 1);
    assert_eq!(moved.total_duration, 25);
    assert!(engine
        .indexes
        .entity_dates()
        .get_set("walk", today)
        .unwrap()
        .is_empty());

    assert!(engine.verify_integrity().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_update_missing_and_unknown_entity() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    let record = add(&engine, "walk", today, 8, 25).await;

    let err = engine
        .update_record("nope", RecordUpdate::new().duration(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RecordNotFound(_)));

    let err = engine
        .update_record(&record.id, RecordUpdate::new().entity("swim"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::EntityNotFound(_)));

    // Failed mutations leave the queue usable
    engine
        .update_record(&record.id, RecordUpdate::new().intensity(Some(7)))
        .await
        .unwrap();
    let summary = engine.get_daily_summary("walk", today).await.unwrap();
    assert_eq!(summary.average_intensity(), Some(7.0));
}

#[tokio::test]
async fn test_replace_reasons_dedupes() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    let record = add(&engine, "walk", today, 8, 25).await;

    let updated = engine
        .replace_reasons(
            &record.id,
            vec!["stress".into(), "boredom".into(), "stress".into()],
        )
        .await
        .unwrap();
    assert_eq!(updated.reasons, vec!["stress", "boredom"]);
    assert_eq!(
        engine.get_record(&record.id).unwrap().unwrap().reasons,
        updated.reasons
    );
    assert_eq!(engine.get_daily_summary("walk", today).await.unwrap().total_count, 1);
}

#[tokio::test]
async fn test_usage_errors() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;

    let err = engine
        .get_by_date_range(today, today.pred())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidDayRange { .. }));

    let err = engine.get_daily_summary("swim", today).await.unwrap_err();
    assert!(matches!(err, StorageError::EntityNotFound(_)));

    let err = engine
        .get_by_entity_day_range("bad|id", today, today)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidEntityId(_)));

    let err = engine
        .create_record(NewRecord::new("swim", at(today, 9)))
        .await
        .unwrap_err();
    assert!(err.is_usage_error());

    let first = engine
        .create_record(NewRecord::new("walk", at(today, 9)).id("fixed"))
        .await
        .unwrap();
    let err = engine
        .create_record(NewRecord::new("walk", at(today, 10)).id(first.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RecordExists(_)));
}

#[tokio::test]
async fn test_out_of_range_records_are_rejected() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;

    let err = engine
        .create_record(NewRecord::new("walk", at(today, 8)).id("b").duration(-5))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRecord(_)));
    assert!(err.is_usage_error());
    assert!(engine.get_record("b").unwrap().is_none());

    let err = engine
        .create_record(NewRecord::new("walk", at(today, 8)).intensity(11))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRecord(_)));

    let kept = engine
        .create_record(NewRecord::new("walk", at(today, 9)).id("a").duration(10))
        .await
        .unwrap();
    let err = engine
        .update_record(&kept.id, RecordUpdate::new().duration(-20))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRecord(_)));
    assert_eq!(engine.get_record("a").unwrap().unwrap().duration_minutes, 10);

    // Indexed and scanned answers agree and the indexes stay trusted
    let indexed = engine.get_daily_summary("walk", today).await.unwrap();
    let straddled = engine
        .get_daily_summary_range(SummaryScope::All, today.add_days(-60), today)
        .await
        .unwrap();
    assert_eq!(indexed.total_count, 1);
    assert_eq!(indexed.total_duration, 10);
    assert_eq!(straddled[&crate::index::SummaryKey::new("walk", today)].total_duration, 10);

    assert!(engine.verify_integrity().await.unwrap().is_consistent());
    assert!(!engine.optimization_status().unwrap().using_scan_fallback);
}

#[tokio::test]
async fn test_straddling_range_merges_scan_and_index() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, _) = cold_engine(&store, today).await;

    let old = add(&engine, "walk", today.add_days(-45), 18, 5).await;
    let recent_late = add(&engine, "walk", today.add_days(-2), 20, 5).await;
    let recent_early = add(&engine, "read", today.add_days(-2), 6, 40).await;
    engine.initialize().await.unwrap();

    let records = engine
        .get_by_date_range(today.add_days(-60), today)
        .await
        .unwrap();
    assert_eq!(
        ids(&records),
        vec![
            old.id.as_str(),
            recent_early.id.as_str(),
            recent_late.id.as_str()
        ]
    );
    assert_eq!(engine.read_stats().scanned, 1);

    let walks = engine
        .get_by_entity_day_range("walk", today.add_days(-60), today)
        .await
        .unwrap();
    assert_eq!(ids(&walks), vec![old.id.as_str(), recent_late.id.as_str()]);

    let rows = engine
        .get_daily_summary_range(SummaryScope::All, today.add_days(-60), today)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    let read_row = &rows[&crate::index::SummaryKey::new("read", today.add_days(-2))];
    assert_eq!(read_row.total_duration, 40);

    let walk_rows = engine
        .get_daily_summary_range(
            SummaryScope::Entity("walk".into()),
            today.add_days(-60),
            today,
        )
        .await
        .unwrap();
    assert_eq!(walk_rows.len(), 2);

    // Fully inside the window: served from the indexes
    let indexed_before = engine.read_stats().indexed;
    engine
        .get_by_date_range(today.add_days(-7), today)
        .await
        .unwrap();
    assert_eq!(engine.read_stats().indexed, indexed_before + 1);
}

#[tokio::test]
async fn test_all_entities_summary_reads_each_entity() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    engine
        .register_entity(EntityConfig::new("walker", "Dog walker"))
        .unwrap();

    add(&engine, "walk", today, 8, 10).await;
    add(&engine, "walker", today, 9, 15).await;
    add(&engine, "read", today.pred(), 21, 30).await;
    add(&engine, "walk", today.add_days(-5), 8, 99).await;
    engine.deactivate_entity("read").unwrap();

    let before = engine.read_stats().indexed;
    let rows = engine
        .get_daily_summary_range(SummaryScope::All, today.pred(), today)
        .await
        .unwrap();
    assert_eq!(engine.read_stats().indexed, before + 1);

    let keys: Vec<String> = rows.keys().map(|k| k.storage_key()).collect();
    assert_eq!(keys, vec!["read|20240229", "walk|20240301", "walker|20240301"]);
    assert_eq!(rows[&crate::index::SummaryKey::new("walker", today)].total_duration, 15);
}

#[tokio::test]
async fn test_reads_scan_during_rebuild() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let clock = FixedClock::new(today);
    let engine = Engine::builder(&store)
        .config(EngineConfig {
            yield_every: 1,
            ..test_config()
        })
        .clock(Arc::new(clock))
        .yield_point(Arc::new(SleepYield(Duration::from_millis(2))))
        .open()
        .await
        .unwrap();
    engine
        .register_entity(EntityConfig::new("walk", "Walk"))
        .unwrap();

    let mut expected = BTreeSet::new();
    for i in 0..60 {
        let record = add(&engine, "walk", today.add_days(-(i % 5)), 12, 1).await;
        if record.day_key == today {
            expected.insert(record.id);
        }
    }

    let engine = Arc::new(engine);
    let rebuild = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.rebuild_indexes_from_scratch().await })
    };

    let mut observed = false;
    for _ in 0..200 {
        if engine.optimization_status().unwrap().using_scan_fallback {
            observed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(observed, "rebuild never observed in flight");

    let scanned_before = engine.read_stats().scanned;
    let records = engine.get_by_day_key(today).await.unwrap();
    let found: BTreeSet<String> = records.into_iter().map(|r| r.id).collect();
    assert_eq!(found, expected);
    assert!(engine.read_stats().scanned > scanned_before);

    rebuild.await.unwrap().unwrap();
    assert!(!engine.optimization_status().unwrap().using_scan_fallback);
    assert!(engine.verify_integrity().await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_keep_indexes_consistent() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, _) = cold_engine(&store, today).await;
    engine.initialize().await.unwrap();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for worker in 0..8i64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let entity = if worker % 2 == 0 { "walk" } else { "read" };
            let mut kept: usize = 0;
            for i in 0..20i64 {
                let record = engine
                    .create_record(
                        NewRecord::new(entity, at(today.add_days(-(i % 7)), 12)).duration(i),
                    )
                    .await
                    .unwrap();
                if i % 3 == 0 {
                    engine.delete_record(&record.id).await.unwrap();
                } else {
                    kept += 1;
                }
                // Interleave reads with the writers
                engine.get_by_day_key(today).await.unwrap();
            }
            kept
        }));
    }

    let mut kept = 0;
    for handle in handles {
        kept += handle.await.unwrap();
    }

    let report = engine.verify_integrity().await.unwrap();
    assert!(report.is_consistent(), "{:?}", report);
    assert_eq!(report.records_checked, kept);

    let rows = engine
        .get_daily_summary_range(SummaryScope::All, today.add_days(-6), today)
        .await
        .unwrap();
    for (key, summary) in &rows {
        let members = engine
            .indexes
            .entity_dates()
            .get_set(&key.entity_id, key.day_key)
            .unwrap();
        assert_eq!(summary.total_count as usize, members.len());
    }
    let total: i64 = rows.values().map(|s| s.total_count).sum();
    assert_eq!(total as usize, kept);
}

#[tokio::test]
async fn test_corrupt_index_falls_back_to_scan() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let (engine, clock) = cold_engine(&store, today).await;
    let record = add(&engine, "walk", today, 9, 10).await;
    engine.initialize().await.unwrap();
    drop(engine);

    let engine = reopen(&store, &clock).await;
    engine.indexes.dates().add(today, "ghost").unwrap();

    let found = engine.get_by_day_key(today).await.unwrap();
    assert_eq!(ids(&found), vec![record.id.as_str()]);

    let status = engine.optimization_status().unwrap();
    assert!(status.using_scan_fallback);
    assert!(status.rebuild_needed);
    // Backfill is pointless while indexes are distrusted
    assert!(!engine.backfill_next_chunk(10).await.unwrap());
    drop(engine);

    // rebuild_needed forces a fresh bootstrap on the next open
    let engine = reopen(&store, &clock).await;
    let status = engine.optimization_status().unwrap();
    assert!(status.ready);
    assert!(!status.rebuild_needed);
    assert!(!status.using_scan_fallback);
    assert_eq!(engine.indexes.dates().get_set(today).unwrap(), vec![record.id]);
}

#[tokio::test]
async fn test_rebuild_repairs_in_place() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    add(&engine, "walk", today, 9, 10).await;

    engine.indexes.summaries().replace_all(&Default::default()).unwrap();
    let report = engine.verify_integrity().await.unwrap();
    assert_eq!(report.summary_mismatches, 1);
    assert!(engine.optimization_status().unwrap().using_scan_fallback);

    // Scans still answer correctly
    assert_eq!(engine.get_daily_summary("walk", today).await.unwrap().total_count, 1);

    engine.rebuild_indexes_from_scratch().await.unwrap();
    let status = engine.optimization_status().unwrap();
    assert!(!status.using_scan_fallback);
    assert!(!status.rebuild_needed);
    assert!(engine.verify_integrity().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_background_backfill_completes_and_stops() {
    let store = MemoryStore::new();
    let today = day("20240301");
    let clock = FixedClock::new(today);
    let seed = Engine::builder(&store)
        .config(EngineConfig {
            bootstrap_on_open: false,
            ..test_config()
        })
        .clock(Arc::new(clock.clone()))
        .open()
        .await
        .unwrap();
    seed.register_entity(EntityConfig::new("walk", "Walk")).unwrap();
    add(&seed, "walk", today.add_days(-400), 9, 10).await;
    drop(seed);

    let engine = Arc::new(
        Engine::builder(&store)
            .config(EngineConfig {
                backfill_interval: Duration::from_millis(10),
                ..test_config()
            })
            .clock(Arc::new(clock))
            .open()
            .await
            .unwrap(),
    );
    assert!(!engine.index_meta().unwrap().backfill_complete);

    let handle = engine.start_background_backfill();
    for _ in 0..200 {
        if engine.index_meta().unwrap().backfill_complete {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.index_meta().unwrap().backfill_complete);

    engine.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_sqlite_store_reopens_without_bootstrap() {
    let dir = tempdir().unwrap();
    let today = day("20240301");
    let clock = FixedClock::new(today);

    let record = {
        let store = SqliteStore::open(dir.path()).unwrap();
        let engine = Engine::builder(&store)
            .config(test_config())
            .clock(Arc::new(clock.clone()))
            .open()
            .await
            .unwrap();
        engine
            .register_entity(EntityConfig::new("walk", "Walk"))
            .unwrap();
        add(&engine, "walk", today, 9, 45).await
    };

    let store = SqliteStore::open(dir.path()).unwrap();
    let engine = Engine::builder(&store)
        .config(EngineConfig {
            bootstrap_on_open: false,
            ..test_config()
        })
        .clock(Arc::new(clock))
        .open()
        .await
        .unwrap();

    let status = engine.optimization_status().unwrap();
    assert!(status.ready);
    assert_eq!(status.last_indexed_day_key, Some(today));

    let found = engine.get_by_day_key(today).await.unwrap();
    assert_eq!(found, vec![record]);
    let summary = engine.get_daily_summary("walk", today).await.unwrap();
    assert_eq!(summary.total_duration, 45);
    assert_eq!(engine.read_stats().indexed, 2);
}

#[tokio::test]
async fn test_stats_display() {
    let today = day("20240301");
    let (engine, _store) = ready_engine(today).await;
    add(&engine, "walk", today, 9, 10).await;

    let stats = engine.stats().unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.index.date_buckets, 1);
    assert!(stats.to_string().contains("Records: 1"));
}
