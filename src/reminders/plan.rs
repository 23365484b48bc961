// src/reminders/plan.rs

//! Pure reminder planning: VALIDATE_TIME → (ADJUST | REJECT) → entry list.
//!
//! Kept free of I/O so the timing rules are testable against an explicit
//! `now` instead of the wall clock.

use chrono::{DateTime, Duration, Utc};

use crate::error::{SyncError, SyncResult};

/// Timing tunables, lifted from `Config` at engine construction.
#[derive(Debug, Clone, Copy)]
pub struct PlanConfig {
    pub min_lead: Duration,
    pub recurrence_horizon_days: u32,
}

impl PlanConfig {
    pub fn new(min_lead_secs: u64, recurrence_horizon_days: u32) -> Self {
        Self {
            min_lead: Duration::seconds(min_lead_secs as i64),
            recurrence_horizon_days,
        }
    }
}

/// One scheduler entry to register. The name doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub name: String,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReminderPlan {
    pub entries: Vec<PlannedEntry>,
    /// The requested time fell inside the minimum-lead window and was moved.
    pub adjusted: bool,
}

/// Validate a requested fire time and materialize the entry list.
///
/// - Past time, non-recurring: `PastDeadline`, zero entries.
/// - Time within `[now, now + min_lead)`: adjusted. Non-recurring entries
///   move to `now + 2 * min_lead`; recurring ones roll forward in whole-day
///   steps to the next occurrence outside the window.
/// - Further out: accepted as-is.
///
/// Recurring reminders materialize as up to `recurrence_horizon_days`
/// independently-named entries at 24 h multiples, because the scheduler has
/// no reschedule-on-fire primitive. Every occurrence carries a 1-based
/// `" (Day i)"` suffix so the fire path has a single strip rule.
pub fn plan(
    text: &str,
    fire_time: DateTime<Utc>,
    recurring: bool,
    now: DateTime<Utc>,
    cfg: &PlanConfig,
) -> SyncResult<ReminderPlan> {
    if !recurring && fire_time < now {
        return Err(SyncError::PastDeadline);
    }

    let lead_cutoff = now + cfg.min_lead;
    let mut adjusted = false;

    let first = if recurring {
        let mut first = fire_time;
        while first < lead_cutoff {
            first += Duration::days(1);
            adjusted = true;
        }
        first
    } else if fire_time < lead_cutoff {
        adjusted = true;
        now + cfg.min_lead * 2
    } else {
        fire_time
    };

    let entries = if recurring {
        (0..cfg.recurrence_horizon_days)
            .map(|i| PlannedEntry {
                name: format!("{text} (Day {})", i + 1),
                fire_at: first + Duration::days(i as i64),
            })
            .collect()
    } else {
        vec![PlannedEntry {
            name: text.to_string(),
            fire_at: first,
        }]
    };

    Ok(ReminderPlan { entries, adjusted })
}
