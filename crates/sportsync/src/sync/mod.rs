//! Sync engines for pulling upstream collections into local storage
//!
//! Provides resumable paginated sync plus targeted re-fetching by ID.
//! Both paths share one [`RateBudgetTracker`](crate::rate::RateBudgetTracker).

mod engine;
mod retry;
mod status;
mod targeted;
mod timing;

pub use engine::{CycleOutcome, PaginatedSyncEngine, SyncCycleReport, SyncOptions};
pub use retry::RetryPolicy;
pub use status::{SyncStatus, sync_status};
pub use targeted::{TargetedEntitySync, TargetedError, TargetedSyncResult};
pub use timing::{CycleAction, determine_cycle_action, resume_time_reached};
