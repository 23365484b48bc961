// src/panel.rs

//! Conversation panel logic, embeddable in an overlay or standalone.
//!
//! A panel owns a local transcript copy and converges it with the shared
//! store by re-running the merge on every mutation notification; that is
//! the only propagation path between concurrent panels.

use std::sync::{Arc, Weak};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, QueryOutcome};
use crate::error::{SyncError, SyncResult};
use crate::store::{keys, SharedStore};
use crate::transcript::{self, merge_local, Message};

pub struct Panel {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn SharedStore>,
    transcript: Mutex<Vec<Message>>,
    /// Highlighted banner text for PastDeadline / HostInvalidated failures.
    banner: Mutex<Option<String>>,
    /// Currently displayed reminder notification, if any.
    notification: Mutex<Option<String>>,
    watch: Mutex<Option<JoinHandle<()>>>,
}

impl Panel {
    /// Mount a panel: run the epoch guard once, load and merge the shared
    /// transcript, and subscribe to store notifications.
    pub async fn mount(
        coordinator: Arc<Coordinator>,
        store: Arc<dyn SharedStore>,
    ) -> SyncResult<Arc<Self>> {
        if let Err(e) = coordinator.reconcile_epoch().await {
            // A panel must still come up when the service is down.
            warn!(error = %e, "mount-time reconcile failed");
        }

        let initial = transcript::load(store.as_ref()).await?;
        let panel = Arc::new(Self {
            coordinator: coordinator.clone(),
            store,
            transcript: Mutex::new(initial),
            banner: Mutex::new(None),
            notification: Mutex::new(None),
            watch: Mutex::new(None),
        });

        coordinator.panel_opened();
        let handle = Self::spawn_store_watch(&panel);
        *panel.watch.lock().await = Some(handle);
        Ok(panel)
    }

    /// Submit a user turn: persist it optimistically, dispatch the query,
    /// and render the outcome. Failures render as inline system messages;
    /// PastDeadline and HostInvalidated additionally raise the banner.
    pub async fn submit(self: &Arc<Self>, text: &str) -> SyncResult<QueryOutcome> {
        *self.banner.lock().await = None;

        let snapshot = {
            let mut local = self.transcript.lock().await;
            local.push(Message::user(text));
            let remote = transcript::load(self.store.as_ref()).await?;
            let merged = merge_local(&remote, &local);
            transcript::persist(self.store.as_ref(), &merged).await?;
            *local = merged;
            local.clone()
        };

        match self.coordinator.handle_query(text, &snapshot).await {
            Ok(QueryOutcome::TimedOut) => {
                self.append_system(
                    "Still thinking… any actions will be applied once the answer arrives.",
                )
                .await?;
                Ok(QueryOutcome::TimedOut)
            }
            Ok(outcome) => {
                // Reply was persisted by the coordinator; converge on it.
                self.refresh().await?;
                Ok(outcome)
            }
            Err(e) => {
                self.render_failure(&e).await?;
                Err(e)
            }
        }
    }

    /// Re-merge the local copy against the store. Run on every mutation
    /// notification; if the local copy wins (in-flight optimistic append
    /// against a stale read), it is written back.
    pub async fn refresh(&self) -> SyncResult<()> {
        let remote = transcript::load(self.store.as_ref()).await?;
        let mut local = self.transcript.lock().await;
        let merged = merge_local(&remote, &local);
        if merged != remote {
            transcript::persist(self.store.as_ref(), &merged).await?;
        }
        *local = merged;
        Ok(())
    }

    /// Dismiss the visible reminder notification everywhere.
    pub async fn dismiss_notification(&self) -> SyncResult<()> {
        *self.notification.lock().await = None;
        self.coordinator.dismiss_notification().await
    }

    pub async fn transcript(&self) -> Vec<Message> {
        self.transcript.lock().await.clone()
    }

    pub async fn banner(&self) -> Option<String> {
        self.banner.lock().await.clone()
    }

    pub async fn notification(&self) -> Option<String> {
        self.notification.lock().await.clone()
    }

    /// Unmount: stop watching and release the panel-open count.
    pub async fn unmount(&self) {
        if let Some(handle) = self.watch.lock().await.take() {
            handle.abort();
        }
        self.coordinator.panel_closed();
    }

    async fn append_system(&self, text: &str) -> SyncResult<()> {
        let mut local = self.transcript.lock().await;
        local.push(Message::system(text));
        let remote = transcript::load(self.store.as_ref()).await?;
        let merged = merge_local(&remote, &local);
        transcript::persist(self.store.as_ref(), &merged).await?;
        *local = merged;
        Ok(())
    }

    async fn render_failure(&self, error: &SyncError) -> SyncResult<()> {
        let text = match error {
            SyncError::PastDeadline => "That time has already passed.".to_string(),
            SyncError::HostInvalidated => {
                "The assistant was updated. Please reload this tab.".to_string()
            }
            other => format!("Something went wrong: {other}"),
        };
        if error.wants_banner() {
            *self.banner.lock().await = Some(text.clone());
        }
        self.append_system(&text).await
    }

    /// Mirror the pending-notification key into local display state.
    async fn sync_notification(&self) {
        let text = match self.store.get(keys::PENDING_NOTIFICATION).await {
            Ok(Some(Value::Object(map))) => map
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_string),
            _ => None,
        };
        *self.notification.lock().await = text;
    }

    /// Store-notification watcher: transcript keys re-merge, the pending
    /// notification key mirrors into local display state (which is how a
    /// dismissal elsewhere clears it here). A lagged receiver has dropped
    /// events for unknown keys, so it re-reads everything it watches.
    fn spawn_store_watch(panel: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Panel> = Arc::downgrade(panel);
        let mut events = BroadcastStream::new(panel.store.subscribe());
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(skipped, "store watch lagged; re-reading");
                        let Some(panel) = weak.upgrade() else { break };
                        if let Err(e) = panel.refresh().await {
                            warn!(error = %e, "post-lag refresh failed");
                        }
                        panel.sync_notification().await;
                        continue;
                    }
                };
                let Some(panel) = weak.upgrade() else { break };

                if event.key == keys::TRANSCRIPT
                    || keys::TRANSCRIPT_ALIASES.contains(&event.key.as_str())
                {
                    if let Err(e) = panel.refresh().await {
                        warn!(error = %e, "transcript refresh failed");
                    }
                } else if event.key == keys::PENDING_NOTIFICATION {
                    panel.sync_notification().await;
                }
            }
        })
    }
}
