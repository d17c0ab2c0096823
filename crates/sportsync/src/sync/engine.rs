//! Checkpointed, rate-aware paginated sync
//!
//! Each invocation of [`PaginatedSyncEngine::run_sync_cycle`] loads the
//! checkpoint, then loops fetch page -> upsert items -> save checkpoint
//! until the upstream says there is nothing more, the budget runs out, or
//! something fails. A page only counts as done once its checkpoint write
//! returned, so a crash re-processes at most the in-flight page.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;

use super::retry::RetryPolicy;
use super::timing::{CycleAction, determine_cycle_action};
use crate::api::{FetchOutcome, Page, PageFetcher};
use crate::clock::Clock;
use crate::config::SyncJobConfig;
use crate::error::SyncError;
use crate::models::{
    EntityRecord, ItemError, RateLimitInfo, SyncCheckpoint, SyncMode, SyncStats, UpsertOutcome,
};
use crate::rate::{RateBudgetTracker, Reservation, reset_time_after};
use crate::storage::{CheckpointStore, RecordSink};

/// Per-invocation options
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Start a new cycle even if the stored one completed
    pub restart: bool,
}

impl SyncOptions {
    pub fn restart() -> Self {
        Self { restart: true }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CycleOutcome {
    /// Upstream reported the last page
    Completed,
    /// `max_pages_per_run` reached; the next invocation continues
    PageBudgetReached,
    /// Budget exhausted during this invocation
    RateLimited { next_resume_time: DateTime<Utc> },
    /// Fatal fetch, retries exhausted, or progress could not be saved
    Failed { error: String },
    /// Invoked before a stored resume deadline; nothing was done
    StillWaiting { next_resume_time: DateTime<Utc> },
    /// Cycle finished earlier and no restart was requested
    AlreadyCompleted,
}

/// Result handed back to whoever scheduled the cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleReport {
    pub sync_id: String,
    /// False only for [`CycleOutcome::Failed`]; rate limiting is expected
    pub success: bool,
    pub outcome: CycleOutcome,
    /// Cumulative stats of the cycle, as durably recorded
    pub stats: SyncStats,
    /// What this invocation alone contributed
    pub run_stats: SyncStats,
    pub pages_fetched: u32,
    /// Last durable checkpoint, if any
    pub checkpoint: Option<SyncCheckpoint>,
}

impl SyncCycleReport {
    fn without_progress(
        sync_id: &str,
        outcome: CycleOutcome,
        checkpoint: Option<SyncCheckpoint>,
    ) -> Self {
        Self {
            sync_id: sync_id.to_string(),
            success: !matches!(outcome, CycleOutcome::Failed { .. }),
            outcome,
            stats: checkpoint.as_ref().map(|c| c.stats).unwrap_or_default(),
            run_stats: SyncStats::default(),
            pages_fetched: 0,
            checkpoint,
        }
    }
}

/// Drives paginated syncs against a rate-limited upstream
pub struct PaginatedSyncEngine {
    fetcher: Arc<dyn PageFetcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    tracker: Arc<RateBudgetTracker>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl PaginatedSyncEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        tracker: Arc<RateBudgetTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            checkpoints,
            sink,
            tracker,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tracker(&self) -> &Arc<RateBudgetTracker> {
        &self.tracker
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Run one sync cycle for a job
    ///
    /// Safe to call on any cadence: it resumes, waits, or no-ops according
    /// to the stored checkpoint. Never returns an error; failures are
    /// reported through [`CycleOutcome::Failed`] and persisted as the
    /// checkpoint's `last_error` where possible.
    pub fn run_sync_cycle(&self, job: &SyncJobConfig, options: SyncOptions) -> SyncCycleReport {
        let now = self.clock.now();

        let stored = match self.checkpoints.load(&job.sync_id) {
            Ok(stored) => stored,
            Err(e) => {
                let err = SyncError::CheckpointRead {
                    sync_id: job.sync_id.clone(),
                    cause: format!("{:#}", e),
                };
                error!("[SYNC] {}", err);
                return SyncCycleReport::without_progress(
                    &job.sync_id,
                    CycleOutcome::Failed {
                        error: err.to_string(),
                    },
                    None,
                );
            }
        };

        if let Some(cp) = &stored {
            self.tracker.seed(&job.entity_type, &cp.rate_limit_info);
        }

        let action = determine_cycle_action(stored.as_ref(), options.restart, now);
        let mut checkpoint = match (action, stored) {
            (CycleAction::Wait { until }, stored) => {
                info!(
                    "[SYNC] {}: still waiting until {} ({})",
                    job.sync_id,
                    until,
                    stored.as_ref().map_or("unknown", |c| c.mode.label())
                );
                return SyncCycleReport::without_progress(
                    &job.sync_id,
                    CycleOutcome::StillWaiting {
                        next_resume_time: until,
                    },
                    stored,
                );
            }
            (CycleAction::AlreadyComplete, stored) => {
                info!("[SYNC] {}: already completed, nothing to do", job.sync_id);
                return SyncCycleReport::without_progress(
                    &job.sync_id,
                    CycleOutcome::AlreadyCompleted,
                    stored,
                );
            }
            (CycleAction::StartFresh, Some(previous)) => {
                info!("[SYNC] {}: restarting cycle from page 1", job.sync_id);
                previous.restarted(now)
            }
            (CycleAction::StartFresh, None) | (CycleAction::Resume { .. }, None) => {
                info!("[SYNC] {}: starting first cycle", job.sync_id);
                SyncCheckpoint::fresh(job.sync_id.clone(), job.entity_type.clone(), now)
            }
            (CycleAction::Resume { from_page }, Some(mut previous)) => {
                info!(
                    "[SYNC] {}: resuming from page {} (was {})",
                    job.sync_id,
                    from_page,
                    previous.mode.label()
                );
                if matches!(
                    previous.mode,
                    SyncMode::RateLimited { .. } | SyncMode::Failed { .. }
                ) {
                    previous.mode = SyncMode::Resuming;
                }
                previous
            }
        };
        checkpoint.entity_type = job.entity_type.clone();

        let mut run = CycleRun {
            engine: self,
            job,
            checkpoint,
            run_stats: SyncStats::default(),
            pages_fetched: 0,
        };
        let outcome = run.drive();
        run.finish(outcome)
    }
}

/// State of one in-progress invocation
struct CycleRun<'a> {
    engine: &'a PaginatedSyncEngine,
    job: &'a SyncJobConfig,
    /// Last durably saved state (or the initial state before the first save)
    checkpoint: SyncCheckpoint,
    run_stats: SyncStats,
    pages_fetched: u32,
}

impl CycleRun<'_> {
    fn drive(&mut self) -> CycleOutcome {
        loop {
            if let Some(max) = self.job.max_pages_per_run
                && self.pages_fetched >= max
            {
                info!(
                    "[SYNC] {}: page budget of {} reached, pausing at page {}",
                    self.job.sync_id, max, self.checkpoint.current_page
                );
                return CycleOutcome::PageBudgetReached;
            }

            if self.pages_fetched > 0 && self.job.page_delay_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(self.job.page_delay_ms));
            }

            let page = match self.fetch_current_page() {
                Ok(page) => page,
                Err(outcome) => return outcome,
            };

            match self.process_page(page) {
                Ok(true) => continue,
                Ok(false) => {
                    info!(
                        "[SYNC] {}: completed after {} pages ({} items)",
                        self.job.sync_id,
                        self.checkpoint.stats.pages_completed,
                        self.checkpoint.items_processed
                    );
                    return CycleOutcome::Completed;
                }
                Err(outcome) => return outcome,
            }
        }
    }

    /// Fetch `current_page`, retrying transient failures
    fn fetch_current_page(&mut self) -> Result<Page, CycleOutcome> {
        let engine = self.engine;
        let entity_type = &self.job.entity_type;
        let page_number = self.checkpoint.current_page;
        let mut retry = 0;

        loop {
            if let Reservation::Denied { resets_in_seconds } = engine.tracker.reserve(entity_type) {
                let err = SyncError::RateLimitExceeded {
                    entity_type: entity_type.clone(),
                    resets_in_seconds,
                };
                warn!("[SYNC] {}: {} before page {}", self.job.sync_id, err, page_number);
                return Err(self.enter_rate_limited(resets_in_seconds, err.to_string()));
            }

            let err = match engine
                .fetcher
                .fetch_page(&self.job.endpoint, page_number, &self.job.extra_params)
            {
                FetchOutcome::Success(page) => return Ok(page),
                FetchOutcome::RateLimited {
                    retry_after_seconds,
                } => {
                    engine
                        .tracker
                        .mark_exhausted(entity_type, retry_after_seconds);
                    let reason = format!(
                        "Upstream rate limit on page {}, retry after {}s",
                        page_number, retry_after_seconds
                    );
                    warn!("[SYNC] {}: {}", self.job.sync_id, reason);
                    return Err(self.enter_rate_limited(retry_after_seconds, reason));
                }
                FetchOutcome::TransientError { cause } => SyncError::TransientFetch { cause },
                FetchOutcome::FatalError { cause } => SyncError::FatalFetch { cause },
            };

            if !err.is_retryable() {
                error!("[SYNC] {}: page {}: {}", self.job.sync_id, page_number, err);
                return Err(self.enter_failed(err.to_string()));
            }
            if retry >= engine.retry.max_retries {
                let message = format!("{} (page {}, {} attempts)", err, page_number, retry + 1);
                error!("[SYNC] {}: giving up: {}", self.job.sync_id, message);
                return Err(self.enter_failed(message));
            }
            warn!(
                "[SYNC] {}: page {} attempt {}/{}: {}",
                self.job.sync_id,
                page_number,
                retry + 1,
                engine.retry.max_retries + 1,
                err
            );
            engine.retry.wait(retry);
            retry += 1;
        }
    }

    /// Upsert a page's items and durably advance the checkpoint
    ///
    /// Returns whether more pages follow.
    fn process_page(&mut self, page: Page) -> Result<bool, CycleOutcome> {
        let engine = self.engine;
        let entity_type = &self.job.entity_type;
        let now = engine.clock.now();

        if let Some(snapshot) = &page.rate_limit {
            engine.tracker.record_snapshot(entity_type, snapshot);
        }

        let mut next = self.checkpoint.clone();
        let page_number = next.current_page;
        let item_count = page.items.len() as u64;
        let mut page_stats = SyncStats {
            pages_completed: 1,
            ..SyncStats::default()
        };

        for item in page.items {
            let result = EntityRecord::from_item(entity_type, item).and_then(|record| {
                engine
                    .sink
                    .upsert(&record)
                    .map_err(|e| SyncError::ItemUpsert {
                        entity_id: record.id,
                        cause: format!("{:#}", e),
                    })
            });

            match result {
                Ok(UpsertOutcome::Created) => page_stats.created += 1,
                Ok(UpsertOutcome::Updated) => page_stats.updated += 1,
                Err(err) => {
                    warn!("[SYNC] {}: page {}: {}", self.job.sync_id, page_number, err);
                    page_stats.failed += 1;
                    let entity_id = match &err {
                        SyncError::ItemUpsert { entity_id, .. } => Some(*entity_id),
                        _ => None,
                    };
                    next.record_item_error(ItemError {
                        entity_id,
                        page: page_number,
                        error: err.to_string(),
                    });
                }
            }
        }

        let has_more = page.pagination.has_more;
        if next.total_pages_discovered.is_none() {
            next.total_pages_discovered = page.pagination.total_pages;
        }
        next.items_processed += item_count;
        next.stats += page_stats;
        next.last_sync_time = Some(now);
        next.rate_limit_info = self.rate_limit_info(now);
        if has_more {
            next.current_page += 1;
            next.mode = SyncMode::Resuming;
        } else {
            next.mode = SyncMode::Completed { completed_at: now };
        }

        self.commit(next)?;
        self.run_stats += page_stats;
        self.pages_fetched += 1;

        debug!(
            "[SYNC] {}: page {} done ({} items, {} created, {} updated, {} failed)",
            self.job.sync_id,
            page_number,
            item_count,
            page_stats.created,
            page_stats.updated,
            page_stats.failed
        );
        Ok(has_more)
    }

    /// Save `next`; only on success does it become the current state
    fn commit(&mut self, next: SyncCheckpoint) -> Result<(), CycleOutcome> {
        match self.engine.checkpoints.save(&next) {
            Ok(()) => {
                self.checkpoint = next;
                Ok(())
            }
            Err(e) => {
                let err = SyncError::CheckpointWrite {
                    sync_id: self.job.sync_id.clone(),
                    cause: format!("{:#}", e),
                };
                error!("[SYNC] {}", err);
                Err(self.enter_failed(err.to_string()))
            }
        }
    }

    fn rate_limit_info(&self, now: DateTime<Utc>) -> RateLimitInfo {
        let budget = self.engine.tracker.budget(&self.job.entity_type);
        RateLimitInfo {
            calls_used: budget.used,
            reset_time: Some(budget.reset_time()),
            last_call_time: Some(now),
        }
    }

    fn enter_rate_limited(&mut self, resets_in_seconds: i64, reason: String) -> CycleOutcome {
        let now = self.engine.clock.now();
        let next_resume_time = reset_time_after(now, resets_in_seconds);

        let mut next = self.checkpoint.clone();
        next.mode = SyncMode::RateLimited {
            next_resume_time,
            reason,
        };
        next.last_sync_time = Some(now);
        next.rate_limit_info = self.rate_limit_info(now);

        match self.commit(next) {
            Ok(()) => CycleOutcome::RateLimited { next_resume_time },
            Err(outcome) => outcome,
        }
    }

    /// Record a failure, keeping `current_page` on the page that failed
    ///
    /// Saving the failed state is best effort: if the store itself is what
    /// failed, the last durable checkpoint still points at a page that
    /// has not been completed.
    fn enter_failed(&mut self, last_error: String) -> CycleOutcome {
        let now = self.engine.clock.now();
        let mut next = self.checkpoint.clone();
        next.mode = SyncMode::Failed {
            last_error: last_error.clone(),
            next_resume_time: None,
        };
        next.last_sync_time = Some(now);

        match self.engine.checkpoints.save(&next) {
            Ok(()) => {
                self.checkpoint = next;
                CycleOutcome::Failed { error: last_error }
            }
            Err(e) => {
                error!(
                    "[SYNC] {}: could not record failure either: {:#}",
                    self.job.sync_id, e
                );
                CycleOutcome::Failed {
                    error: format!("{}; failure not recorded: {:#}", last_error, e),
                }
            }
        }
    }

    fn finish(self, outcome: CycleOutcome) -> SyncCycleReport {
        info!(
            "[SYNC] {}: {} -> {} ({} pages this run, {} created, {} updated, {} failed)",
            self.job.sync_id,
            self.checkpoint.mode.label(),
            outcome_label(&outcome),
            self.pages_fetched,
            self.run_stats.created,
            self.run_stats.updated,
            self.run_stats.failed
        );
        SyncCycleReport {
            sync_id: self.job.sync_id.clone(),
            success: !matches!(outcome, CycleOutcome::Failed { .. }),
            outcome,
            stats: self.checkpoint.stats,
            run_stats: self.run_stats,
            pages_fetched: self.pages_fetched,
            checkpoint: Some(self.checkpoint),
        }
    }
}

fn outcome_label(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Completed => "completed",
        CycleOutcome::PageBudgetReached => "paused",
        CycleOutcome::RateLimited { .. } => "rate-limited",
        CycleOutcome::Failed { .. } => "failed",
        CycleOutcome::StillWaiting { .. } => "waiting",
        CycleOutcome::AlreadyCompleted => "already-completed",
    }
}
