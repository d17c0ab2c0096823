//! Storage trait definitions

use anyhow::Result;

use crate::models::{EntityId, EntityRecord, EntityType, SyncCheckpoint, UpsertOutcome};

/// Durable store for sync checkpoints
///
/// Single writer per `sync_id` is assumed; the job scheduler is
/// responsible for never running the same sync twice concurrently.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a sync, if one was ever saved
    fn load(&self, sync_id: &str) -> Result<Option<SyncCheckpoint>>;

    /// Insert or replace the checkpoint (last write wins)
    ///
    /// Must be durable when this returns `Ok`.
    fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()>;

    /// Remove a checkpoint entirely
    fn delete(&self, sync_id: &str) -> Result<()>;

    /// All stored checkpoints, ordered by sync_id
    fn list(&self) -> Result<Vec<SyncCheckpoint>>;
}

/// Keyed sink for upstream records
///
/// Upserts are keyed by `(entity_type, id)`, so writing the same record
/// twice yields `Updated` the second time instead of a duplicate.
pub trait RecordSink: Send + Sync {
    fn upsert(&self, record: &EntityRecord) -> Result<UpsertOutcome>;

    /// Fetch a stored record
    fn get(&self, entity_type: &EntityType, id: EntityId) -> Result<Option<EntityRecord>>;

    /// Count stored records of a type
    fn count(&self, entity_type: &EntityType) -> Result<usize>;
}
