// src/reminders/scheduler.rs

//! Scheduler seam: wall-clock callback registration independent of any one
//! context's lifetime.
//!
//! Identity is name-only and delivery is at-least-once; registering an
//! existing name replaces it, cancelling an already-fired or unknown name is
//! success.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::SyncResult;

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    /// Register `name` to fire at `fire_at`. A past `fire_at` fires
    /// immediately (validation happens in the planner, not here).
    async fn register(&self, name: &str, fire_at: DateTime<Utc>) -> SyncResult<()>;

    /// Idempotent: cancelling a fired, cancelled, or unknown name succeeds.
    async fn cancel(&self, name: &str) -> SyncResult<()>;

    /// Names of entries that have not fired yet.
    async fn names(&self) -> Vec<String>;
}

/// Tokio-backed scheduler. Each entry is an abortable sleep task that pushes
/// its name into the fired channel on expiry; the coordinator drains that
/// channel.
pub struct TokioScheduler {
    entries: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    fired_tx: mpsc::UnboundedSender<String>,
}

impl TokioScheduler {
    /// Returns the scheduler and the stream of fired names.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fired_tx,
        });
        (scheduler, fired_rx)
    }
}

#[async_trait]
impl ReminderScheduler for TokioScheduler {
    async fn register(&self, name: &str, fire_at: DateTime<Utc>) -> SyncResult<()> {
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let entries = Arc::clone(&self.entries);
        let fired_tx = self.fired_tx.clone();
        let task_name = name.to_string();

        let handle = tokio::spawn({
            let name = task_name.clone();
            async move {
                tokio::time::sleep(delay).await;
                entries.lock().await.remove(&name);
                // Receiver gone means the whole engine is shutting down.
                let _ = fired_tx.send(name);
            }
        });

        // Name is the dedup key: re-registration replaces the old entry.
        if let Some(old) = self.entries.lock().await.insert(task_name, handle) {
            old.abort();
        }
        Ok(())
    }

    async fn cancel(&self, name: &str) -> SyncResult<()> {
        match self.entries.lock().await.remove(name) {
            Some(handle) => handle.abort(),
            None => debug!(name, "cancel of unknown or already-fired entry"),
        }
        Ok(())
    }

    async fn names(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}
