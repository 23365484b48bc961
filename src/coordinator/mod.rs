// src/coordinator/mod.rs

//! The coordinator: single source of truth for dispatch decisions.
//!
//! Long-lived but evictable at any time; everything it must survive losing
//! lives in the shared store or the scheduler. It owns the reasoning client,
//! the reminder engine, the epoch guard, and the per-tab overlay registry
//! (accessor-only, no module-level handles anywhere).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::epoch::EpochGuard;
use crate::error::SyncResult;
use crate::host::{TabHost, TabId};
use crate::overlay::{DomSurface, OverlayInstance};
use crate::reasoning::ReasoningApi;
use crate::reminders::ReminderEngine;
use crate::store::SharedStore;

pub mod alerts;
pub mod dispatch;

pub use dispatch::{CloseReport, QueryOutcome};

pub struct Coordinator {
    pub(crate) service: Arc<dyn ReasoningApi>,
    pub(crate) store: Arc<dyn SharedStore>,
    pub(crate) host: Arc<dyn TabHost>,
    pub(crate) reminders: Arc<ReminderEngine>,
    epoch: EpochGuard,
    overlays: Mutex<HashMap<TabId, Arc<Mutex<OverlayInstance>>>>,
    /// Correlation ids whose caller already received a timeout; a reply
    /// arriving for one of these applies side effects but appends nothing.
    pub(crate) timed_out: Mutex<HashSet<Uuid>>,
    open_panels: AtomicUsize,
    pub(crate) query_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        service: Arc<dyn ReasoningApi>,
        store: Arc<dyn SharedStore>,
        host: Arc<dyn TabHost>,
        reminders: Arc<ReminderEngine>,
        config: &Config,
    ) -> Arc<Self> {
        let epoch = EpochGuard::new(store.clone(), service.clone(), reminders.clone());
        Arc::new(Self {
            service,
            store,
            host,
            reminders,
            epoch,
            overlays: Mutex::new(HashMap::new()),
            timed_out: Mutex::new(HashSet::new()),
            open_panels: AtomicUsize::new(0),
            query_timeout: config.query_timeout(),
        })
    }

    /// Run the epoch guard once. Panels call this on mount and the poll loop
    /// calls it on its interval; dispatch calls it before every query.
    pub async fn reconcile_epoch(&self) -> SyncResult<bool> {
        self.epoch.reconcile().await
    }

    /// Fan a notification dismissal out to every context (store mutation
    /// plus direct broadcast). Idempotent.
    pub async fn dismiss_notification(&self) -> SyncResult<()> {
        self.reminders.dismiss().await
    }

    // ── Overlay registry (accessor-only; see dispatch for focus/close) ──

    /// Get or create the singleton overlay for a tab. Idempotent: a second
    /// registration for the same tab returns the existing instance and drops
    /// the offered surface. A persisted visibility flag from a previous
    /// context reopens the overlay here.
    pub async fn register_overlay(
        &self,
        tab: TabId,
        surface: Arc<dyn DomSurface>,
    ) -> Arc<Mutex<OverlayInstance>> {
        let overlay = self
            .overlays
            .lock()
            .await
            .entry(tab)
            .or_insert_with(|| {
                Arc::new(Mutex::new(OverlayInstance::new(
                    tab,
                    surface,
                    self.store.clone(),
                )))
            })
            .clone();

        if crate::overlay::visible_flag(self.store.as_ref(), tab).await {
            if let Err(e) = overlay.lock().await.ensure_open().await {
                warn!(tab, error = %e, "overlay restore failed");
            }
        }
        overlay
    }

    pub async fn overlay(&self, tab: TabId) -> Option<Arc<Mutex<OverlayInstance>>> {
        self.overlays.lock().await.get(&tab).cloned()
    }

    /// Drop the registration on tab close or navigation away.
    pub async fn remove_overlay(&self, tab: TabId) {
        self.overlays.lock().await.remove(&tab);
    }

    // ── Panel presence (gates the background poll loop) ──

    pub fn panel_opened(&self) {
        self.open_panels.fetch_add(1, Ordering::SeqCst);
    }

    pub fn panel_closed(&self) {
        let _ = self
            .open_panels
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn any_panel_open(&self) -> bool {
        self.open_panels.load(Ordering::SeqCst) > 0
    }

    // ── Background loops ──

    /// Epoch + alert polling while any panel is open.
    pub fn spawn_poll_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            info!(?interval, "poll loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !coordinator.any_panel_open() {
                    continue;
                }
                if let Err(e) = coordinator.reconcile_epoch().await {
                    error!(error = %e, "epoch reconcile failed");
                }
                if let Err(e) = coordinator.surface_unread_alerts().await {
                    error!(error = %e, "alert poll failed");
                }
            }
        })
    }

    /// Drain fired reminder names into the notify fan-out.
    pub fn spawn_fire_loop(
        self: &Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(name) = fired.recv().await {
                if let Err(e) = coordinator.reminders.on_fire(&name).await {
                    error!(%name, error = %e, "reminder notify failed");
                }
            }
            info!("fire loop ended: scheduler channel closed");
        })
    }
}
