// src/epoch.rs

//! Session-epoch guard.
//!
//! The reasoning service exposes an opaque epoch that changes when it
//! restarts. A changed epoch means every persisted reference (transcript
//! context, reminder intents) may no longer resolve, so both are
//! invalidated. Transient unavailability is never confused with a restart:
//! the epoch is only observable while the service is reachable.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::reasoning::ReasoningApi;
use crate::reminders::ReminderEngine;
use crate::store::{keys, SharedStore};
use crate::transcript;

pub struct EpochGuard {
    store: Arc<dyn SharedStore>,
    service: Arc<dyn ReasoningApi>,
    reminders: Arc<ReminderEngine>,
    // Collapses concurrent invocations from N panels into idempotent no-ops.
    lock: tokio::sync::Mutex<()>,
}

impl EpochGuard {
    pub fn new(
        store: Arc<dyn SharedStore>,
        service: Arc<dyn ReasoningApi>,
        reminders: Arc<ReminderEngine>,
    ) -> Self {
        Self {
            store,
            service,
            reminders,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Reconcile the persisted epoch against the observed one. Returns
    /// `true` when a reset occurred (first run counts: pre-existing state
    /// from a prior install is defensively cleared).
    ///
    /// Invoked opportunistically: before each query, on a fixed poll
    /// interval while any panel is open, and once on panel mount. Safe under
    /// concurrent invocation.
    pub async fn reconcile(&self) -> SyncResult<bool> {
        let _guard = self.lock.lock().await;

        let observed = match self.service.health().await {
            Ok(epoch) => epoch,
            Err(SyncError::Transient(reason)) => {
                // Service down is not a restart; leave local state alone.
                debug!(%reason, "epoch unobservable; skipping reconcile");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let persisted = self
            .store
            .get(keys::SESSION_EPOCH)
            .await?
            .and_then(|v| v.as_str().map(str::to_string));

        match persisted {
            Some(ref epoch) if *epoch == observed => Ok(false),
            Some(epoch) => {
                info!(old = %epoch, new = %observed, "session epoch changed; clearing state");
                self.clear_session_state().await?;
                self.store
                    .set(keys::SESSION_EPOCH, json!(observed))
                    .await?;
                Ok(true)
            }
            None => {
                // First run: a prior install may have left orphaned state
                // behind under the same keys.
                info!(epoch = %observed, "no persisted epoch; defensive clear");
                self.clear_session_state().await?;
                self.store
                    .set(keys::SESSION_EPOCH, json!(observed))
                    .await?;
                Ok(true)
            }
        }
    }

    /// Clear transcript (every alias, canonical key last) and cancel all
    /// outstanding reminders. Reminder names already fired or gone cancel
    /// as successes.
    async fn clear_session_state(&self) -> SyncResult<()> {
        transcript::clear(self.store.as_ref()).await?;
        self.store.remove(keys::PENDING_NOTIFICATION).await?;
        let cancelled = self.reminders.cancel_all().await?;
        if cancelled > 0 {
            info!(cancelled, "outstanding reminders cancelled");
        }
        Ok(())
    }
}
