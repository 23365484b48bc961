// src/reminders/mod.rs

//! Reminder engine: planning, materialization, fire-time notification
//! fan-out, and dismissal.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::host::TabHost;
use crate::messages::ContextMessage;
use crate::notify::Notifier;
use crate::reasoning::ReminderRequest;
use crate::store::{keys, SharedStore};

pub mod plan;
pub mod scheduler;

pub use plan::{plan, PlanConfig, PlannedEntry, ReminderPlan};
pub use scheduler::{ReminderScheduler, TokioScheduler};

/// Names carrying this prefix are reserved for internal self-checks and are
/// filtered out of every user-visible surface.
pub const INTERNAL_PREFIX: &str = "__tabmind";

static DAY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" \(Day \d+\)$").expect("day-suffix pattern"));

/// Outcome of materializing one reminder request. Partial registration is
/// acceptable: firing the first occurrence satisfies the user-visible
/// contract, so the succeeded subset is never rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub requested: usize,
    pub registered: usize,
    pub adjusted: bool,
}

pub struct ReminderEngine {
    scheduler: Arc<dyn ReminderScheduler>,
    store: Arc<dyn SharedStore>,
    host: Arc<dyn TabHost>,
    notifier: Arc<dyn Notifier>,
    cfg: PlanConfig,
}

impl ReminderEngine {
    pub fn new(
        scheduler: Arc<dyn ReminderScheduler>,
        store: Arc<dyn SharedStore>,
        host: Arc<dyn TabHost>,
        notifier: Arc<dyn Notifier>,
        cfg: PlanConfig,
    ) -> Self {
        Self {
            scheduler,
            store,
            host,
            notifier,
            cfg,
        }
    }

    /// Validate, adjust, and register one reminder request.
    ///
    /// `PastDeadline` creates zero entries. A registration failure mid-range
    /// does not block later entries; the report carries the success count.
    pub async fn schedule(&self, req: &ReminderRequest) -> SyncResult<ScheduleReport> {
        let plan = plan::plan(&req.text, req.fire_time, req.recurring, Utc::now(), &self.cfg)?;

        let requested = plan.entries.len();
        let mut registered = 0usize;
        for entry in &plan.entries {
            match self.scheduler.register(&entry.name, entry.fire_at).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(name = %entry.name, error = %e, "reminder entry registration failed");
                }
            }
        }

        if registered == 0 && requested > 0 {
            return Err(SyncError::Transient(format!(
                "no reminder entry could be registered for '{}'",
                req.text
            )));
        }
        if registered < requested {
            info!(
                requested,
                registered,
                text = %req.text,
                "reminder partially registered"
            );
        }

        Ok(ScheduleReport {
            requested,
            registered,
            adjusted: plan.adjusted,
        })
    }

    /// NOTIFY: called with the fired entry name.
    ///
    /// Strips the recurrence suffix, filters internal self-check names, and
    /// fans out on every channel at once: the shared store (for contexts
    /// that render late), a broadcast to every live tab, and one OS-level
    /// notification.
    pub async fn on_fire(&self, name: &str) -> SyncResult<()> {
        if name.starts_with(INTERNAL_PREFIX) {
            info!(name, "internal reminder fired; suppressed");
            return Ok(());
        }

        let text = display_text(name).to_string();
        info!(%text, "reminder fired");

        self.store
            .set(
                keys::PENDING_NOTIFICATION,
                json!({ "text": text, "createdAt": Utc::now().timestamp_millis() }),
            )
            .await?;
        self.host
            .broadcast(ContextMessage::ShowNotification { text: text.clone() })
            .await;
        self.notifier.notify("Reminder", &text).await;
        Ok(())
    }

    /// Dismissal fans out through both the store mutation notification and a
    /// direct broadcast, so the same logical notification disappears
    /// everywhere it was shown. Idempotent: dismissing an already-dismissed
    /// notification is a no-op that still re-broadcasts.
    pub async fn dismiss(&self) -> SyncResult<()> {
        self.store.remove(keys::PENDING_NOTIFICATION).await?;
        self.host.broadcast(ContextMessage::DismissNotification).await;
        Ok(())
    }

    /// Cancel every outstanding entry by name. Used by the epoch guard; an
    /// entry already fired or gone is not an error. Returns how many names
    /// were cancelled.
    pub async fn cancel_all(&self) -> SyncResult<usize> {
        let names = self.scheduler.names().await;
        let count = names.len();
        for name in names {
            self.scheduler.cancel(&name).await?;
        }
        Ok(count)
    }

    pub async fn outstanding(&self) -> Vec<String> {
        self.scheduler.names().await
    }
}

/// User-visible text for a fired entry: the name with any `" (Day i)"`
/// recurrence suffix removed.
pub fn display_text(name: &str) -> &str {
    match DAY_SUFFIX.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}
