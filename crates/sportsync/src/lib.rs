//! Sportsync crate - Resumable ingestion of rate-limited sports data
//!
//! This crate provides:
//! - Domain models (SyncCheckpoint, SyncMode, EntityRecord)
//! - Per-entity-type rate budget tracking
//! - Upstream API client with response classification
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Checkpointed paginated sync engine
//! - Targeted sync for repairing known gaps by ID
//!
//! Everything is blocking; concurrency is confined to the targeted sync's
//! bounded worker pool.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod rate;
pub mod storage;
pub mod sync;

pub use api::{
    EntityFetcher, FetchOutcome, FetchedEntity, Page, PageFetcher, Pagination, SportsApiClient,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ApiCredentials, SyncJobConfig, SyncSettings};
pub use error::SyncError;
pub use models::{
    EntityId, EntityRecord, EntityType, ItemError, RateLimitInfo, SyncCheckpoint, SyncMode,
    SyncStats, UpsertOutcome,
};
pub use rate::{BudgetStatus, RateBudgetTracker, RateLimitSettings, Reservation};
pub use storage::{CheckpointStore, InMemorySyncStore, RecordSink, SqliteSyncStore};
pub use sync::{
    // Cycle execution
    CycleOutcome, PaginatedSyncEngine, SyncCycleReport, SyncOptions, RetryPolicy,
    // Cycle decision
    CycleAction, determine_cycle_action,
    // Targeted repair
    TargetedEntitySync, TargetedSyncResult,
    // Monitoring
    SyncStatus, sync_status,
};
