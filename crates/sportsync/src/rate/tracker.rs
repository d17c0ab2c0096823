//! Rate budget tracker implementation

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::models::{EntityType, RateLimitInfo};

/// Default calls per entity type per window (upstream plan limit)
const DEFAULT_LIMIT: u32 = 3000;
/// Default window length: one hour
const DEFAULT_WINDOW_SECONDS: i64 = 3600;
/// Longest reset delay accepted from upstream: one week
pub const MAX_RESET_SECONDS: i64 = 7 * 24 * 3600;

/// `now` plus an upstream-reported reset delay, clamped to `0..=MAX_RESET_SECONDS`
pub fn reset_time_after(now: DateTime<Utc>, resets_in_seconds: i64) -> DateTime<Utc> {
    let delay = Duration::seconds(resets_in_seconds.clamp(0, MAX_RESET_SECONDS));
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Budget configuration shared by all entity types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Calls allowed per window for entity types without an override
    pub default_limit: u32,
    /// Window length in seconds
    pub window_seconds: i64,
    /// Per-entity-type limits, keyed by entity type name
    pub per_entity: BTreeMap<String, u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            per_entity: BTreeMap::new(),
        }
    }
}

impl RateLimitSettings {
    fn limit_for(&self, entity_type: &EntityType) -> u32 {
        self.per_entity
            .get(entity_type.as_str())
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// Remaining budget for one entity type inside the current window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub entity_type: EntityType,
    pub limit: u32,
    pub used: u32,
    pub window_start: DateTime<Utc>,
    pub window_duration_seconds: i64,
}

impl RateBudget {
    fn new(entity_type: EntityType, limit: u32, window_seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            entity_type,
            limit,
            used: 0,
            window_start: now,
            window_duration_seconds: window_seconds,
        }
    }

    fn window(&self) -> Duration {
        Duration::try_seconds(self.window_duration_seconds.max(0)).unwrap_or(Duration::MAX)
    }

    fn window_end(&self) -> DateTime<Utc> {
        self.window_start
            .checked_add_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Place the window so that it ends at `reset_time`
    fn ends_at(&mut self, reset_time: DateTime<Utc>) {
        self.window_start = reset_time
            .checked_sub_signed(self.window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
    }

    /// Start a new window if the current one has elapsed
    fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.window_end() {
            self.used = 0;
            self.window_start = now;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// When the current window ends
    pub fn reset_time(&self) -> DateTime<Utc> {
        self.window_end()
    }

    /// Whole seconds until the window resets, rounded up
    pub fn resets_in_seconds(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.window_end() - now).num_milliseconds().max(0);
        (millis + 999) / 1000
    }
}

/// Answer to "may I make one more call?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Allowed,
    Denied { resets_in_seconds: i64 },
}

impl Reservation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed)
    }
}

/// Snapshot of the budget as reported by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub resets_in_seconds: i64,
    /// Some APIs report the plan limit alongside the remaining count
    pub limit: Option<u32>,
}

/// Read-only view of one budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub resets_in_seconds: i64,
}

/// Tracks remaining calls per entity type and predicts resets
///
/// Construct once and share it (via `Arc`) between the paginated and
/// targeted sync paths so both draw from the same budget. Upstream
/// counters always override local estimates, because other processes may
/// be spending the same budget.
pub struct RateBudgetTracker {
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
    budgets: Mutex<HashMap<EntityType, RateBudget>>,
}

impl RateBudgetTracker {
    pub fn new(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` on the (lazily created, rolled-forward) budget for an entity type
    fn with_budget<T>(
        &self,
        entity_type: &EntityType,
        f: impl FnOnce(&mut RateBudget, DateTime<Utc>) -> T,
    ) -> T {
        let now = self.clock.now();
        let mut budgets = self.budgets.lock().unwrap();
        let budget = budgets.entry(entity_type.clone()).or_insert_with(|| {
            RateBudget::new(
                entity_type.clone(),
                self.settings.limit_for(entity_type),
                self.settings.window_seconds,
                now,
            )
        });
        budget.roll(now);
        f(budget, now)
    }

    /// Claim one call from the budget
    ///
    /// On `Allowed` the local estimate is bumped by one; the next response
    /// carrying authoritative counters corrects it.
    pub fn reserve(&self, entity_type: &EntityType) -> Reservation {
        self.with_budget(entity_type, |budget, now| {
            if budget.used >= budget.limit {
                let resets_in_seconds = budget.resets_in_seconds(now);
                debug!(
                    "[RATE] Denied {} ({}/{} used, resets in {}s)",
                    entity_type, budget.used, budget.limit, resets_in_seconds
                );
                Reservation::Denied { resets_in_seconds }
            } else {
                budget.used += 1;
                Reservation::Allowed
            }
        })
    }

    /// Overwrite local state with authoritative counters
    pub fn record_usage(
        &self,
        entity_type: &EntityType,
        used: u32,
        limit: u32,
        reset_time: DateTime<Utc>,
    ) {
        self.with_budget(entity_type, |budget, _| {
            budget.limit = limit;
            budget.used = used.min(limit);
            budget.ends_at(reset_time);
        });
    }

    /// Apply a remaining/resets-in snapshot taken from a response body
    pub fn record_snapshot(&self, entity_type: &EntityType, snapshot: &RateLimitSnapshot) {
        let now = self.clock.now();
        let current_limit = self.with_budget(entity_type, |budget, _| budget.limit);
        let limit = snapshot
            .limit
            .unwrap_or(current_limit)
            .max(snapshot.remaining);
        let used = limit - snapshot.remaining;
        let reset_time = reset_time_after(now, snapshot.resets_in_seconds);
        self.record_usage(entity_type, used, limit, reset_time);
    }

    /// Mark a budget as spent after the upstream refused a call
    pub fn mark_exhausted(&self, entity_type: &EntityType, resets_in_seconds: i64) {
        warn!(
            "[RATE] Upstream reports {} exhausted, resets in {}s",
            entity_type, resets_in_seconds
        );
        let reset_time = reset_time_after(self.clock.now(), resets_in_seconds);
        self.with_budget(entity_type, |budget, _| {
            budget.used = budget.limit;
            budget.ends_at(reset_time);
        });
    }

    /// Restore a budget from usage persisted by an earlier process
    ///
    /// Ignored once the entity type is known in this process, or when the
    /// persisted window has already reset.
    pub fn seed(&self, entity_type: &EntityType, info: &RateLimitInfo) {
        let Some(reset_time) = info.reset_time else {
            return;
        };
        if reset_time <= self.clock.now() || self.budgets.lock().unwrap().contains_key(entity_type) {
            return;
        }
        debug!(
            "[RATE] Seeding {} with {} calls used, resets at {}",
            entity_type, info.calls_used, reset_time
        );
        let limit = self.settings.limit_for(entity_type);
        self.record_usage(entity_type, info.calls_used, limit, reset_time);
    }

    /// Current state of a single budget
    pub fn budget(&self, entity_type: &EntityType) -> RateBudget {
        self.with_budget(entity_type, |budget, _| budget.clone())
    }

    /// Status of every entity type referenced so far
    pub fn get_status(&self) -> BTreeMap<EntityType, BudgetStatus> {
        let now = self.clock.now();
        let mut budgets = self.budgets.lock().unwrap();
        budgets
            .iter_mut()
            .map(|(entity_type, budget)| {
                budget.roll(now);
                (
                    entity_type.clone(),
                    BudgetStatus {
                        limit: budget.limit,
                        used: budget.used,
                        remaining: budget.remaining(),
                        resets_in_seconds: budget.resets_in_seconds(now),
                    },
                )
            })
            .collect()
    }
}
