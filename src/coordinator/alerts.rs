// src/coordinator/alerts.rs

//! Price-alert surfacing.
//!
//! Alerts are polled on the same cadence as epoch reconciliation. Unread
//! ones land in the transcript as system messages and are acknowledged
//! immediately, so a second poll (or a second panel) does not duplicate
//! them.

use tracing::{debug, warn};

use super::Coordinator;
use crate::error::SyncResult;
use crate::transcript::{self, Message};

impl Coordinator {
    /// Fetch unread alerts, append them as system transcript messages, and
    /// mark them read. Transient service failures are logged and skipped;
    /// they never touch local state.
    pub async fn surface_unread_alerts(&self) -> SyncResult<()> {
        let alerts = match self.service.alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                debug!(error = %e, "alerts unavailable");
                return Ok(());
            }
        };

        let unread: Vec<_> = alerts.into_iter().filter(|a| !a.read).collect();
        if unread.is_empty() {
            return Ok(());
        }

        let mut current = transcript::load(self.store.as_ref()).await?;
        for alert in &unread {
            current.push(Message::system(format!("Price alert: {}", alert.text)));
        }
        transcript::persist(self.store.as_ref(), &current).await?;

        for alert in &unread {
            if let Err(e) = self.service.mark_alert_read(&alert.id).await {
                // At worst the alert is surfaced again next poll; the
                // transcript merge keeps the longer history either way.
                warn!(id = %alert.id, error = %e, "could not acknowledge alert");
            }
        }
        Ok(())
    }
}
