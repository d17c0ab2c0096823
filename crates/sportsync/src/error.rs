//! Error taxonomy for sync operations

use crate::models::{EntityId, EntityType};

/// Errors raised while driving a sync
///
/// The `Display` text of these variants is what gets recorded as a
/// checkpoint's `last_error`, so keep messages operator-readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The call budget for an entity type is exhausted
    #[error("Rate limit exceeded for {entity_type}, resets in {resets_in_seconds}s")]
    RateLimitExceeded {
        entity_type: EntityType,
        resets_in_seconds: i64,
    },

    /// Network failure or 5xx; retried with a bounded number of attempts
    #[error("Transient fetch error: {cause}")]
    TransientFetch { cause: String },

    /// 4xx other than rate limiting; never retried
    #[error("Fatal fetch error: {cause}")]
    FatalFetch { cause: String },

    /// An item in a page could not be turned into a record
    #[error("Malformed item: {cause}")]
    MalformedItem { cause: String },

    /// The persistence sink rejected a single record
    #[error("Failed to upsert {entity_id}: {cause}")]
    ItemUpsert { entity_id: EntityId, cause: String },

    /// Progress could not be durably recorded
    #[error("Failed to write checkpoint for {sync_id}: {cause}")]
    CheckpointWrite { sync_id: String, cause: String },

    /// The stored checkpoint could not be read
    #[error("Failed to read checkpoint for {sync_id}: {cause}")]
    CheckpointRead { sync_id: String, cause: String },
}

impl SyncError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientFetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SyncError::RateLimitExceeded {
            entity_type: EntityType::new("players"),
            resets_in_seconds: 42,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for players, resets in 42s"
        );

        let err = SyncError::ItemUpsert {
            entity_id: EntityId(7),
            cause: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to upsert #7: disk full");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SyncError::TransientFetch { cause: "503".into() }.is_retryable());
        assert!(!SyncError::FatalFetch { cause: "401".into() }.is_retryable());
    }
}
