//! Domain models for sync entities and progress

mod checkpoint;
mod entity;

pub use checkpoint::{
    ItemError, MAX_ITEM_ERRORS, RateLimitInfo, SyncCheckpoint, SyncMode, SyncStats,
};
pub use entity::{EntityId, EntityRecord, EntityType, UpsertOutcome};
