//! Integration tests for the sportsync crate
//!
//! These tests drive full sync cycles through the public API against a
//! simulated upstream and real storage backends.

use anyhow::{Result, anyhow};
use chrono::Duration;
use serde_json::json;
use sportsync::api::{EntityFetchOutcome, PageFetchOutcome};
use sportsync::{
    CheckpointStore, Clock, CycleOutcome, EntityFetcher, EntityId, EntityType, FetchOutcome,
    FetchedEntity, InMemorySyncStore, ManualClock, Page, PageFetcher, PaginatedSyncEngine,
    Pagination, RateBudgetTracker, RateLimitSettings, RecordSink, RetryPolicy, SqliteSyncStore,
    SyncCheckpoint, SyncJobConfig, SyncMode, SyncOptions, TargetedEntitySync, sync_status,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PAGE_SIZE: u64 = 10;

/// Upstream with a fixed number of pages of `PAGE_SIZE` players each
struct SimulatedUpstream {
    pages: u32,
    requested: Mutex<Vec<u32>>,
    /// Pages that answer 429 the first time they are requested
    throttle_once: Mutex<HashSet<u32>>,
}

impl SimulatedUpstream {
    fn new(pages: u32) -> Arc<Self> {
        Arc::new(Self {
            pages,
            requested: Mutex::new(Vec::new()),
            throttle_once: Mutex::new(HashSet::new()),
        })
    }

    fn throttle(self: Arc<Self>, page: u32) -> Arc<Self> {
        self.throttle_once.lock().unwrap().insert(page);
        self
    }

    fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

impl PageFetcher for SimulatedUpstream {
    fn fetch_page(&self, _: &str, page: u32, _: &[(String, String)]) -> PageFetchOutcome {
        self.requested.lock().unwrap().push(page);
        if self.throttle_once.lock().unwrap().remove(&page) {
            return FetchOutcome::RateLimited {
                retry_after_seconds: 600,
            };
        }
        if page == 0 || page > self.pages {
            return FetchOutcome::FatalError {
                cause: format!("HTTP 400: page {} out of range", page),
            };
        }

        let first = (page as u64 - 1) * PAGE_SIZE + 1;
        FetchOutcome::Success(Page {
            items: (first..first + PAGE_SIZE)
                .map(|id| json!({"id": id, "display_name": format!("Player {}", id)}))
                .collect(),
            pagination: Pagination {
                has_more: page < self.pages,
                total_pages: Some(self.pages),
            },
            rate_limit: None,
        })
    }
}

impl EntityFetcher for SimulatedUpstream {
    fn fetch_entity(&self, _: &str, id: EntityId) -> EntityFetchOutcome {
        FetchOutcome::Success(FetchedEntity {
            item: json!({"id": id.get(), "display_name": format!("Player {}", id.get())}),
            rate_limit: None,
        })
    }
}

/// Store that can be told to fail checkpoint writes, simulating a crash
/// after a page's upserts but before its checkpoint lands
struct CrashingStore {
    inner: SqliteSyncStore,
    crash_on_save: AtomicBool,
}

impl CheckpointStore for CrashingStore {
    fn load(&self, sync_id: &str) -> Result<Option<SyncCheckpoint>> {
        self.inner.load(sync_id)
    }
    fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        if self.crash_on_save.load(Ordering::SeqCst) {
            return Err(anyhow!("process killed"));
        }
        self.inner.save(checkpoint)
    }
    fn delete(&self, sync_id: &str) -> Result<()> {
        self.inner.delete(sync_id)
    }
    fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        self.inner.list()
    }
}

/// Sink that rejects a fixed set of IDs until healed
struct FlakySink {
    inner: InMemorySyncStore,
    reject: Mutex<HashSet<u64>>,
}

impl RecordSink for FlakySink {
    fn upsert(&self, record: &sportsync::EntityRecord) -> Result<sportsync::UpsertOutcome> {
        if self.reject.lock().unwrap().contains(&record.id.get()) {
            return Err(anyhow!("deadlock detected"));
        }
        self.inner.upsert(record)
    }
    fn get(
        &self,
        entity_type: &EntityType,
        id: EntityId,
    ) -> Result<Option<sportsync::EntityRecord>> {
        self.inner.get(entity_type, id)
    }
    fn count(&self, entity_type: &EntityType) -> Result<usize> {
        self.inner.count(entity_type)
    }
}

fn tracker(clock: Arc<ManualClock>, limit: u32) -> Arc<RateBudgetTracker> {
    Arc::new(RateBudgetTracker::new(
        RateLimitSettings {
            default_limit: limit,
            window_seconds: 3600,
            per_entity: BTreeMap::new(),
        },
        clock,
    ))
}

fn players_job() -> SyncJobConfig {
    SyncJobConfig::new("players-full", "players", "players").with_param("include", "position")
}

#[test]
fn test_crash_between_upserts_and_checkpoint_reprocesses_one_page() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sportsync.sqlite");
    let clock = Arc::new(ManualClock::default());
    let upstream = SimulatedUpstream::new(5);
    let players = EntityType::new("players");

    // First process: two pages land, then the third page's checkpoint write dies
    {
        let store = Arc::new(CrashingStore {
            inner: SqliteSyncStore::new(&db_path).unwrap(),
            crash_on_save: AtomicBool::new(false),
        });
        let records = Arc::new(SqliteSyncStore::new(&db_path).unwrap());
        let engine = PaginatedSyncEngine::new(
            upstream.clone(),
            store.clone(),
            records,
            tracker(clock.clone(), 1000),
            clock.clone(),
        );

        let report = engine.run_sync_cycle(&players_job().with_max_pages(2), SyncOptions::default());
        assert_eq!(report.outcome, CycleOutcome::PageBudgetReached);

        store.crash_on_save.store(true, Ordering::SeqCst);
        let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
        assert!(!report.success);
    }

    // Second process reopens the same database
    let store = Arc::new(SqliteSyncStore::new(&db_path).unwrap());
    let stored = store.load("players-full").unwrap().unwrap();
    assert_eq!(stored.current_page, 3);
    assert_eq!(stored.stats.pages_completed, 2);
    // page 3's items were upserted before the crash
    assert_eq!(store.count(&players).unwrap(), 30);

    let engine = PaginatedSyncEngine::new(
        upstream.clone(),
        store.clone(),
        store.clone(),
        tracker(clock.clone(), 1000),
        clock.clone(),
    );
    let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert_eq!(report.outcome, CycleOutcome::Completed);

    // page 3 fetched exactly twice, every other page once
    assert_eq!(upstream.requested(), vec![1, 2, 3, 3, 4, 5]);
    assert_eq!(store.count(&players).unwrap(), 50);

    let cp = report.checkpoint.unwrap();
    assert_eq!(cp.current_page, 5);
    assert_eq!(cp.stats.pages_completed, 5);
    assert_eq!(cp.stats.updated, PAGE_SIZE);
    assert_eq!(cp.stats.created, 40);
    assert_eq!(cp.percent_complete(), Some(100.0));
}

#[test]
fn test_rate_limited_cycle_waits_then_resumes() {
    let clock = Arc::new(ManualClock::default());
    let upstream = SimulatedUpstream::new(3).throttle(2);
    let store = Arc::new(InMemorySyncStore::new());
    let tracker = tracker(clock.clone(), 1000);
    let engine = PaginatedSyncEngine::new(
        upstream.clone(),
        store.clone(),
        store.clone(),
        tracker.clone(),
        clock.clone(),
    );
    let start = clock.now();

    let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert!(report.success);
    assert_eq!(
        report.outcome,
        CycleOutcome::RateLimited {
            next_resume_time: start + Duration::seconds(600)
        }
    );

    let status = sync_status(&*store, &tracker, "players-full", clock.now()).unwrap();
    assert_eq!(status.mode, "rate-limited");
    assert!(status.waiting);
    assert_eq!(status.checkpoint.as_ref().unwrap().current_page, 2);

    // Scheduler fires early: nothing happens
    clock.advance(Duration::seconds(60));
    let before = store.load("players-full").unwrap();
    let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert!(matches!(report.outcome, CycleOutcome::StillWaiting { .. }));
    assert_eq!(store.load("players-full").unwrap(), before);

    // Even an explicit restart is refused while the upstream said wait
    let report = engine.run_sync_cycle(&players_job(), SyncOptions::restart());
    assert!(matches!(report.outcome, CycleOutcome::StillWaiting { .. }));

    clock.advance(Duration::seconds(540));
    let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(upstream.requested(), vec![1, 2, 2, 3]);
    assert_eq!(store.count(&EntityType::new("players")).unwrap(), 30);

    let status = sync_status(&*store, &tracker, "players-full", clock.now()).unwrap();
    assert_eq!(status.mode, "completed");
    assert!(!status.waiting);
}

#[test]
fn test_item_failures_repaired_by_targeted_sync() {
    let clock = Arc::new(ManualClock::default());
    let upstream = SimulatedUpstream::new(2);
    let checkpoints = Arc::new(InMemorySyncStore::new());
    let sink = Arc::new(FlakySink {
        inner: InMemorySyncStore::new(),
        reject: Mutex::new([4, 17].into_iter().collect()),
    });
    let tracker = tracker(clock.clone(), 1000);
    let players = EntityType::new("players");

    let engine = PaginatedSyncEngine::new(
        upstream.clone(),
        checkpoints.clone(),
        sink.clone(),
        tracker.clone(),
        clock.clone(),
    )
    .with_retry_policy(RetryPolicy::immediate(1));
    let report = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.stats.failed, 2);
    assert_eq!(sink.count(&players).unwrap(), 18);

    let cp = report.checkpoint.unwrap();
    assert!(matches!(cp.mode, SyncMode::Completed { .. }));
    assert_eq!(cp.failed_item_ids(), vec![EntityId(4), EntityId(17)]);

    // The sink recovers; repair only what failed
    sink.reject.lock().unwrap().clear();
    let targeted = TargetedEntitySync::new(
        upstream.clone(),
        sink.clone(),
        tracker.clone(),
        "players",
        "players",
    );
    let result = targeted
        .repair_failed_items(&*checkpoints, "players-full", 2)
        .unwrap();
    assert_eq!(result.requested, 2);
    assert_eq!(result.created, 2);
    assert!(result.is_clean());
    assert_eq!(sink.count(&players).unwrap(), 20);

    let cp = checkpoints.load("players-full").unwrap().unwrap();
    assert!(cp.failed_item_ids().is_empty());
    assert!(matches!(cp.mode, SyncMode::Completed { .. }));

    // Nothing left to repair, so no budget is spent
    let result = targeted
        .repair_failed_items(&*checkpoints, "players-full", 2)
        .unwrap();
    assert_eq!(result.requested, 0);

    // Both paths drew from one budget: 2 pages + 2 targeted calls
    assert_eq!(tracker.get_status()[&players].used, 4);
}

#[test]
fn test_restart_after_completion_starts_new_cycle() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let upstream = SimulatedUpstream::new(2);
    let store = Arc::new(SqliteSyncStore::new(dir.path().join("db.sqlite")).unwrap());
    let engine = PaginatedSyncEngine::new(
        upstream.clone(),
        store.clone(),
        store.clone(),
        tracker(clock.clone(), 1000),
        clock.clone(),
    );

    let first = engine.run_sync_cycle(&players_job(), SyncOptions::default());
    assert_eq!(first.outcome, CycleOutcome::Completed);

    clock.advance(Duration::hours(24));
    let second = engine.run_sync_cycle(&players_job(), SyncOptions::restart());
    assert_eq!(second.outcome, CycleOutcome::Completed);

    let cp = second.checkpoint.unwrap();
    assert_eq!(cp.sync_start_time, clock.now());
    assert_eq!(cp.stats.created, 0);
    assert_eq!(cp.stats.updated, 20);
    assert_eq!(cp.items_processed, 20);
    assert_eq!(store.list().unwrap().len(), 1);
}
