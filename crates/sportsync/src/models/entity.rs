//! Upstream entity identifiers and records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::SyncError;

/// A category of upstream resource with its own rate-limit budget
/// (e.g. "players", "teams", "fixtures")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Numeric identifier assigned by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A single upstream record ready to be upserted
///
/// The payload is kept as the raw JSON the API returned; only the `id`
/// field is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub payload: Value,
}

impl EntityRecord {
    pub fn new(entity_type: EntityType, id: EntityId, payload: Value) -> Self {
        Self {
            entity_type,
            id,
            payload,
        }
    }

    /// Build a record from a raw API item, reading its numeric `id` field
    pub fn from_item(entity_type: &EntityType, item: Value) -> Result<Self, SyncError> {
        let id = item
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| SyncError::MalformedItem {
                cause: format!("{} item has no numeric id", entity_type),
            })?;

        Ok(Self::new(entity_type.clone(), EntityId(id), item))
    }
}

/// Result of writing a record to the persistence sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_item_reads_id() {
        let players = EntityType::new("players");
        let record =
            EntityRecord::from_item(&players, json!({"id": 184798, "name": "Pedri"})).unwrap();
        assert_eq!(record.id, EntityId(184798));
        assert_eq!(record.entity_type, players);
        assert_eq!(record.payload["name"], "Pedri");
    }

    #[test]
    fn test_from_item_rejects_missing_id() {
        let teams = EntityType::new("teams");
        let err = EntityRecord::from_item(&teams, json!({"name": "No Id FC"})).unwrap_err();
        assert!(matches!(err, SyncError::MalformedItem { .. }));

        let err = EntityRecord::from_item(&teams, json!({"id": "abc"})).unwrap_err();
        assert!(matches!(err, SyncError::MalformedItem { .. }));
    }

    #[test]
    fn test_entity_type_serializes_as_string() {
        let json = serde_json::to_string(&EntityType::new("fixtures")).unwrap();
        assert_eq!(json, "\"fixtures\"");
    }
}
