//! In-memory storage implementation
//!
//! Used for tests and dry runs; nothing survives the process.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{CheckpointStore, RecordSink};
use crate::models::{EntityId, EntityRecord, EntityType, SyncCheckpoint, UpsertOutcome};

/// In-memory implementation of both storage traits
///
/// Uses maps protected by RwLocks for thread-safe access.
pub struct InMemorySyncStore {
    checkpoints: RwLock<BTreeMap<String, SyncCheckpoint>>,
    records: RwLock<HashMap<(EntityType, EntityId), EntityRecord>>,
}

impl InMemorySyncStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(BTreeMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySyncStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemorySyncStore {
    fn load(&self, sync_id: &str) -> Result<Option<SyncCheckpoint>> {
        let checkpoints = self.checkpoints.read().unwrap();
        Ok(checkpoints.get(sync_id).cloned())
    }

    fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().unwrap();
        checkpoints.insert(checkpoint.sync_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, sync_id: &str) -> Result<()> {
        self.checkpoints.write().unwrap().remove(sync_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        let checkpoints = self.checkpoints.read().unwrap();
        Ok(checkpoints.values().cloned().collect())
    }
}

impl RecordSink for InMemorySyncStore {
    fn upsert(&self, record: &EntityRecord) -> Result<UpsertOutcome> {
        let mut records = self.records.write().unwrap();
        let key = (record.entity_type.clone(), record.id);
        match records.insert(key, record.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }

    fn get(&self, entity_type: &EntityType, id: EntityId) -> Result<Option<EntityRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.get(&(entity_type.clone(), id)).cloned())
    }

    fn count(&self, entity_type: &EntityType) -> Result<usize> {
        let records = self.records.read().unwrap();
        Ok(records.keys().filter(|(t, _)| t == entity_type).count())
    }
}
