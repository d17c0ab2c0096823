//! Per-entity-type call budget accounting
//!
//! The tracker is a pure decision oracle: it answers "may I call now?" and
//! absorbs authoritative counters from API responses. It never sleeps;
//! backing off is the caller's job.

mod tracker;

pub use tracker::{
    BudgetStatus, MAX_RESET_SECONDS, RateBudget, RateBudgetTracker, RateLimitSettings,
    RateLimitSnapshot, Reservation, reset_time_after,
};
