//! Checkpoint tracking for resumable paginated sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityId, EntityType};

/// How many failed item IDs a checkpoint remembers
pub const MAX_ITEM_ERRORS: usize = 100;

/// Lifecycle state of a sync process
///
/// Each state carries only the data that is meaningful for it, so a
/// completed sync can never also carry a resume deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncMode {
    /// Nothing fetched yet in this cycle
    FreshStart,
    /// At least one page done, more to go
    Resuming,
    /// Upstream reported no more pages
    Completed { completed_at: DateTime<Utc> },
    /// Budget exhausted; do not call again before `next_resume_time`
    RateLimited {
        next_resume_time: DateTime<Utc>,
        reason: String,
    },
    /// Fatal error or too many transient failures on `current_page`
    Failed {
        last_error: String,
        next_resume_time: Option<DateTime<Utc>>,
    },
}

impl SyncMode {
    /// Short machine-friendly name of the state
    pub fn label(&self) -> &'static str {
        match self {
            SyncMode::FreshStart => "fresh-start",
            SyncMode::Resuming => "resuming",
            SyncMode::Completed { .. } => "completed",
            SyncMode::RateLimited { .. } => "rate-limited",
            SyncMode::Failed { .. } => "failed",
        }
    }
}

/// Last known upstream budget for the synced entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub calls_used: u32,
    pub reset_time: Option<DateTime<Utc>>,
    pub last_call_time: Option<DateTime<Utc>>,
}

/// Per-item outcome counters accumulated over a sync cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    pub pages_completed: u64,
}

impl std::ops::AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
        self.pages_completed += other.pages_completed;
    }
}

/// An item that could not be stored while processing a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// None when the item had no usable ID
    pub entity_id: Option<EntityId>,
    pub page: u32,
    pub error: String,
}

/// Durable progress record for one named sync process
///
/// Exactly one checkpoint exists per `sync_id`; stores upsert it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub sync_id: String,
    pub entity_type: EntityType,
    pub mode: SyncMode,
    /// Next page to fetch (1-based). After completion, the final page.
    pub current_page: u32,
    /// Advisory only; pagination stops on `has_more`, never on this
    pub total_pages_discovered: Option<u32>,
    pub items_processed: u64,
    pub sync_start_time: DateTime<Utc>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub rate_limit_info: RateLimitInfo,
    pub stats: SyncStats,
    /// Most recent item failures, oldest first
    #[serde(default)]
    pub item_errors: Vec<ItemError>,
}

impl SyncCheckpoint {
    /// Create a checkpoint for a brand-new sync cycle
    pub fn fresh(
        sync_id: impl Into<String>,
        entity_type: EntityType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sync_id: sync_id.into(),
            entity_type,
            mode: SyncMode::FreshStart,
            current_page: 1,
            total_pages_discovered: None,
            items_processed: 0,
            sync_start_time: now,
            last_sync_time: None,
            rate_limit_info: RateLimitInfo::default(),
            stats: SyncStats::default(),
            item_errors: Vec::new(),
        }
    }

    /// Start a new cycle under the same identity, zeroing all counters
    ///
    /// The last known rate-limit info is kept since the upstream budget
    /// does not care about our cycles.
    pub fn restarted(self, now: DateTime<Utc>) -> Self {
        let rate_limit_info = self.rate_limit_info.clone();
        Self {
            rate_limit_info,
            ..Self::fresh(self.sync_id, self.entity_type, now)
        }
    }

    /// Error text if the sync is in the failed state
    pub fn last_error(&self) -> Option<&str> {
        match &self.mode {
            SyncMode::Failed { last_error, .. } => Some(last_error),
            _ => None,
        }
    }

    /// Earliest time the next invocation may do work
    pub fn next_resume_time(&self) -> Option<DateTime<Utc>> {
        match &self.mode {
            SyncMode::RateLimited {
                next_resume_time, ..
            } => Some(*next_resume_time),
            SyncMode::Failed {
                next_resume_time, ..
            } => *next_resume_time,
            _ => None,
        }
    }

    /// Whether an invocation at `now` must be a no-op
    pub fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        self.next_resume_time().is_some_and(|t| now < t)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.mode, SyncMode::Completed { .. })
    }

    /// Remember a failed item, dropping the oldest beyond [`MAX_ITEM_ERRORS`]
    pub fn record_item_error(&mut self, error: ItemError) {
        self.item_errors.push(error);
        if self.item_errors.len() > MAX_ITEM_ERRORS {
            let excess = self.item_errors.len() - MAX_ITEM_ERRORS;
            self.item_errors.drain(..excess);
        }
    }

    /// IDs of items that failed and can be re-fetched individually
    pub fn failed_item_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .item_errors
            .iter()
            .filter_map(|e| e.entity_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Forget item errors for IDs that are no longer failing
    ///
    /// Errors without an ID are kept; they cannot be repaired individually.
    /// Returns whether anything was removed.
    pub fn retain_failed_items(&mut self, still_failing: &[EntityId]) -> bool {
        let before = self.item_errors.len();
        self.item_errors
            .retain(|e| e.entity_id.is_none_or(|id| still_failing.contains(&id)));
        self.item_errors.len() != before
    }

    /// Progress estimate in percent, if the upstream ever told us a total
    pub fn percent_complete(&self) -> Option<f64> {
        if self.is_completed() {
            return Some(100.0);
        }
        let total = self.total_pages_discovered.filter(|t| *t > 0)?;
        let done = self.stats.pages_completed as f64;
        Some((done / total as f64 * 100.0).min(100.0))
    }
}
