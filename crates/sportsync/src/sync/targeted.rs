//! Targeted sync: re-fetch a known set of entities by ID
//!
//! Unlike the paginated engine this path keeps no checkpoint. Every ID is
//! independent, so one failure never affects the others, and the result
//! lists exactly which IDs to retry.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::retry::RetryPolicy;
use crate::api::{EntityFetcher, FetchOutcome, FetchedEntity};
use crate::error::SyncError;
use crate::models::{EntityId, EntityRecord, EntityType, UpsertOutcome};
use crate::rate::{RateBudgetTracker, Reservation};
use crate::storage::{CheckpointStore, RecordSink};

/// Why one ID could not be synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedError {
    pub entity_id: EntityId,
    pub error: String,
}

/// Aggregate outcome of one targeted run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedSyncResult {
    /// Distinct IDs asked for
    pub requested: usize,
    /// IDs the upstream returned
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// One entry per failed ID, ordered by ID
    pub errors: Vec<TargetedError>,
}

impl TargetedSyncResult {
    /// IDs to pass to the next attempt
    pub fn failed_ids(&self) -> Vec<EntityId> {
        self.errors.iter().map(|e| e.entity_id).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// What happened to a single ID
enum ItemResult {
    Stored(UpsertOutcome),
    /// Fetched, but storing it failed
    NotStored(SyncError),
    NotFetched(SyncError),
}

/// Fetches and stores specific entities with bounded parallelism
pub struct TargetedEntitySync {
    fetcher: Arc<dyn EntityFetcher>,
    sink: Arc<dyn RecordSink>,
    tracker: Arc<RateBudgetTracker>,
    entity_type: EntityType,
    endpoint: String,
    retry: RetryPolicy,
}

impl TargetedEntitySync {
    pub fn new(
        fetcher: Arc<dyn EntityFetcher>,
        sink: Arc<dyn RecordSink>,
        tracker: Arc<RateBudgetTracker>,
        entity_type: impl Into<EntityType>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            tracker,
            entity_type: entity_type.into(),
            endpoint: endpoint.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch and upsert each ID, at most `concurrency_limit` at a time
    ///
    /// Duplicate IDs are synced once. Only setting up the worker pool can
    /// fail; per-ID problems are reported in the result.
    pub fn sync_by_ids(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
        concurrency_limit: usize,
    ) -> Result<TargetedSyncResult> {
        let ids: Vec<EntityId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if ids.is_empty() {
            return Ok(TargetedSyncResult::default());
        }

        let workers = concurrency_limit.clamp(1, ids.len());
        info!(
            "[TARGETED] Syncing {} {} with {} workers",
            ids.len(),
            self.entity_type,
            workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("targeted-{}", i))
            .build()
            .context("Failed to build targeted sync worker pool")?;

        let outcomes: Vec<(EntityId, ItemResult)> = pool.install(|| {
            ids.par_iter()
                .map(|&id| (id, self.sync_one(id)))
                .collect()
        });

        let mut result = TargetedSyncResult {
            requested: ids.len(),
            ..TargetedSyncResult::default()
        };
        for (entity_id, outcome) in outcomes {
            let error = match outcome {
                ItemResult::Stored(UpsertOutcome::Created) => {
                    result.fetched += 1;
                    result.created += 1;
                    continue;
                }
                ItemResult::Stored(UpsertOutcome::Updated) => {
                    result.fetched += 1;
                    result.updated += 1;
                    continue;
                }
                ItemResult::NotStored(err) => {
                    result.fetched += 1;
                    err
                }
                ItemResult::NotFetched(err) => err,
            };
            warn!("[TARGETED] {} {}: {}", self.entity_type, entity_id, error);
            result.failed += 1;
            result.errors.push(TargetedError {
                entity_id,
                error: error.to_string(),
            });
        }

        info!(
            "[TARGETED] Done: {} requested, {} fetched, {} created, {} updated, {} failed",
            result.requested, result.fetched, result.created, result.updated, result.failed
        );
        Ok(result)
    }

    /// Re-fetch the items a paginated run could not store
    ///
    /// IDs that now succeed are dropped from the stored checkpoint's item
    /// errors, so the next repair only asks for what is still failing.
    pub fn repair_failed_items(
        &self,
        checkpoints: &dyn CheckpointStore,
        sync_id: &str,
        concurrency_limit: usize,
    ) -> Result<TargetedSyncResult> {
        let mut checkpoint = checkpoints
            .load(sync_id)
            .with_context(|| format!("Failed to load checkpoint for {}", sync_id))?
            .with_context(|| format!("{} has never run", sync_id))?;
        if checkpoint.entity_type != self.entity_type {
            bail!(
                "Checkpoint {} tracks {}, not {}",
                checkpoint.sync_id,
                checkpoint.entity_type,
                self.entity_type
            );
        }

        let ids = checkpoint.failed_item_ids();
        info!(
            "[TARGETED] Repairing {} failed items from {}",
            ids.len(),
            checkpoint.sync_id
        );
        let result = self.sync_by_ids(ids, concurrency_limit)?;

        if checkpoint.retain_failed_items(&result.failed_ids()) {
            checkpoints
                .save(&checkpoint)
                .with_context(|| format!("Failed to save checkpoint for {}", sync_id))?;
            debug!(
                "[TARGETED] {} now has {} failed items",
                sync_id,
                checkpoint.failed_item_ids().len()
            );
        }
        Ok(result)
    }

    fn sync_one(&self, id: EntityId) -> ItemResult {
        let fetched = match self.fetch_with_retry(id) {
            Ok(fetched) => fetched,
            Err(err) => return ItemResult::NotFetched(err),
        };

        if let Some(snapshot) = &fetched.rate_limit {
            self.tracker.record_snapshot(&self.entity_type, snapshot);
        }

        let record = EntityRecord::new(self.entity_type.clone(), id, fetched.item);
        match self.sink.upsert(&record) {
            Ok(outcome) => {
                debug!("[TARGETED] {} {}: {:?}", self.entity_type, id, outcome);
                ItemResult::Stored(outcome)
            }
            Err(e) => ItemResult::NotStored(SyncError::ItemUpsert {
                entity_id: id,
                cause: format!("{:#}", e),
            }),
        }
    }

    fn fetch_with_retry(&self, id: EntityId) -> Result<FetchedEntity, SyncError> {
        let mut retry = 0;
        loop {
            if let Reservation::Denied { resets_in_seconds } =
                self.tracker.reserve(&self.entity_type)
            {
                return Err(SyncError::RateLimitExceeded {
                    entity_type: self.entity_type.clone(),
                    resets_in_seconds,
                });
            }

            let err = match self.fetcher.fetch_entity(&self.endpoint, id) {
                FetchOutcome::Success(fetched) => return Ok(fetched),
                FetchOutcome::RateLimited {
                    retry_after_seconds,
                } => {
                    self.tracker
                        .mark_exhausted(&self.entity_type, retry_after_seconds);
                    return Err(SyncError::RateLimitExceeded {
                        entity_type: self.entity_type.clone(),
                        resets_in_seconds: retry_after_seconds,
                    });
                }
                FetchOutcome::TransientError { cause } => SyncError::TransientFetch { cause },
                FetchOutcome::FatalError { cause } => SyncError::FatalFetch { cause },
            };

            if !err.is_retryable() || retry >= self.retry.max_retries {
                return Err(err);
            }
            debug!("[TARGETED] {} {}: retrying: {}", self.entity_type, id, err);
            self.retry.wait(retry);
            retry += 1;
        }
    }
}
