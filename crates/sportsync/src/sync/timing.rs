//! Cycle decision logic
//!
//! Pure functions that can be tested without storage or network.

use chrono::{DateTime, Utc};

use crate::models::{SyncCheckpoint, SyncMode};

/// What an invocation of the engine should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    /// No usable checkpoint, or the caller asked for a new cycle
    StartFresh,
    /// Continue from the stored page
    Resume { from_page: u32 },
    /// A resume deadline is in the future; do nothing
    Wait { until: DateTime<Utc> },
    /// The cycle already finished and no restart was requested
    AlreadyComplete,
}

/// Decide what to do with a stored checkpoint
///
/// A pending resume deadline wins over a restart request, so calling the
/// engine early can never spend budget the upstream already refused.
///
/// # Arguments
/// * `checkpoint` - The stored checkpoint (None if the sync never ran)
/// * `restart` - Whether the caller explicitly asked for a new cycle
/// * `now` - Current time
pub fn determine_cycle_action(
    checkpoint: Option<&SyncCheckpoint>,
    restart: bool,
    now: DateTime<Utc>,
) -> CycleAction {
    let Some(checkpoint) = checkpoint else {
        return CycleAction::StartFresh;
    };

    if checkpoint.is_waiting(now)
        && let Some(until) = checkpoint.next_resume_time()
    {
        return CycleAction::Wait { until };
    }

    if restart {
        return CycleAction::StartFresh;
    }

    match checkpoint.mode {
        SyncMode::Completed { .. } => CycleAction::AlreadyComplete,
        _ => CycleAction::Resume {
            from_page: checkpoint.current_page,
        },
    }
}

/// Check whether a resume deadline has passed (None means no deadline)
pub fn resume_time_reached(next_resume_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match next_resume_time {
        Some(t) => now >= t,
        None => true,
    }
}
