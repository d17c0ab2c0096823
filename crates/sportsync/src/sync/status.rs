//! Read-only status snapshots for monitoring

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::timing::resume_time_reached;
use crate::models::{EntityType, SyncCheckpoint, SyncMode};
use crate::rate::{BudgetStatus, RateBudgetTracker};
use crate::storage::CheckpointStore;

/// Everything an operator needs to decide whether to wait, retry, or dig in
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub sync_id: String,
    /// Mode label, or "never-run" when no checkpoint exists
    pub mode: String,
    pub checkpoint: Option<SyncCheckpoint>,
    pub percent_complete: Option<f64>,
    /// Why the sync is rate-limited or failed
    pub reason: Option<String>,
    /// When the next invocation will do work (None = immediately)
    pub next_actionable_time: Option<DateTime<Utc>>,
    /// Whether invoking now would be a no-op
    pub waiting: bool,
    pub rate_budgets: BTreeMap<EntityType, BudgetStatus>,
}

/// Build a status snapshot without touching the store
///
/// A tracker that has not seen the job's entity type yet (a fresh process)
/// is seeded from the usage persisted in the checkpoint, so the reported
/// budget survives restarts.
pub fn sync_status(
    store: &dyn CheckpointStore,
    tracker: &RateBudgetTracker,
    sync_id: &str,
    now: DateTime<Utc>,
) -> Result<SyncStatus> {
    let checkpoint = store
        .load(sync_id)
        .with_context(|| format!("Failed to load checkpoint for {}", sync_id))?;
    if let Some(cp) = &checkpoint {
        tracker.seed(&cp.entity_type, &cp.rate_limit_info);
    }

    let (mode, percent_complete, reason, next_resume_time) = match &checkpoint {
        Some(cp) => (
            cp.mode.label().to_string(),
            cp.percent_complete(),
            reason_for(cp),
            cp.next_resume_time(),
        ),
        None => ("never-run".to_string(), None, None, None),
    };

    let waiting = !resume_time_reached(next_resume_time, now);
    Ok(SyncStatus {
        sync_id: sync_id.to_string(),
        mode,
        checkpoint,
        percent_complete,
        reason,
        next_actionable_time: next_resume_time.filter(|_| waiting),
        waiting,
        rate_budgets: tracker.get_status(),
    })
}

fn reason_for(checkpoint: &SyncCheckpoint) -> Option<String> {
    match &checkpoint.mode {
        SyncMode::RateLimited { reason, .. } => Some(reason.clone()),
        SyncMode::Failed { last_error, .. } => Some(last_error.clone()),
        _ => None,
    }
}
