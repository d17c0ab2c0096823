//! Storage traits and implementations
//!
//! This module defines the persistence seams the sync engines write to:
//! a checkpoint store (one progress record per sync) and a record sink
//! (keyed upserts of upstream entities). The trait-based design allows
//! swapping between in-memory and SQLite backends.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemorySyncStore;
pub use sqlite::SqliteSyncStore;
pub use traits::{CheckpointStore, RecordSink};
