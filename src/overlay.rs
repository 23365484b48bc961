// src/overlay.rs

//! Per-tab overlay lifecycle: `ABSENT ↔ OPEN{STATIC, DRAGGING}`.
//!
//! The in-memory open flag is lost when the tab context reloads, but a stale
//! DOM marker may survive, so idempotent creation has to consult both. Every
//! public operation checks host validity first and degrades to
//! `HostInvalidated` instead of panicking into a context that may be
//! mid-teardown.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::host::TabId;
use crate::store::{keys, SharedStore};

/// Read the persisted visibility flag for one tab.
pub(crate) async fn visible_flag(store: &dyn SharedStore, tab: TabId) -> bool {
    matches!(
        store.get(keys::OVERLAY_VISIBLE).await,
        Ok(Some(Value::Object(map))) if map.get(&tab.to_string()).and_then(Value::as_bool) == Some(true)
    )
}

/// Persist (or clear) the visibility flag for one tab. The flag survives a
/// context reload so a fresh registration can restore an open overlay.
pub(crate) async fn set_visible_flag(
    store: &dyn SharedStore,
    tab: TabId,
    visible: bool,
) -> SyncResult<()> {
    let mut map = match store.get(keys::OVERLAY_VISIBLE).await? {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if visible {
        map.insert(tab.to_string(), Value::Bool(true));
    } else if map.remove(&tab.to_string()).is_none() {
        return Ok(());
    }
    store.set(keys::OVERLAY_VISIBLE, Value::Object(map)).await
}

/// Seam over the tab's document surface.
#[async_trait]
pub trait DomSurface: Send + Sync {
    /// Whether our runtime handle into the page is still valid (it breaks
    /// when the extension context reloads underneath the page).
    async fn host_valid(&self) -> bool;

    /// Whether the overlay's DOM-identity marker is present.
    async fn marker_present(&self) -> bool;

    /// Remove a stale marker node left behind by a previous context.
    async fn remove_marker(&self) -> SyncResult<()>;

    /// Mount the overlay node (and its marker).
    async fn mount(&self) -> SyncResult<()>;

    /// Unmount the overlay node and marker.
    async fn unmount(&self) -> SyncResult<()>;

    /// Install a full-viewport transparent layer so pointer movement over
    /// the separately-rendered panel is still observed during a drag.
    async fn install_capture_layer(&self) -> SyncResult<()>;

    async fn remove_capture_layer(&self) -> SyncResult<()>;

    /// Tell the embedded panel dragging ended so it resumes its own pointer
    /// handling.
    async fn notify_panel_drag_end(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    Absent,
    Static,
    Dragging,
}

/// One logical overlay for one tab. At most one per tab; the coordinator's
/// registry enforces the singleton, this type enforces idempotent
/// transitions.
pub struct OverlayInstance {
    tab: TabId,
    surface: Arc<dyn DomSurface>,
    store: Arc<dyn SharedStore>,
    phase: OverlayPhase,
}

impl OverlayInstance {
    pub fn new(tab: TabId, surface: Arc<dyn DomSurface>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            tab,
            surface,
            store,
            phase: OverlayPhase::Absent,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn is_open(&self) -> bool {
        self.phase != OverlayPhase::Absent
    }

    async fn check_host(&self) -> SyncResult<()> {
        if self.surface.host_valid().await {
            Ok(())
        } else {
            Err(SyncError::HostInvalidated)
        }
    }

    /// Idempotent create. No-op if already open per the in-memory flag; a
    /// surviving marker without a live flag is a leftover from a reloaded
    /// context and is cleaned up before mounting fresh.
    pub async fn create(&mut self) -> SyncResult<()> {
        self.check_host().await?;

        if self.is_open() {
            debug!(tab = self.tab, "overlay already open");
            return Ok(());
        }
        if self.surface.marker_present().await {
            info!(tab = self.tab, "removing stale overlay node from previous context");
            self.surface.remove_marker().await?;
        }
        self.surface.mount().await?;
        self.phase = OverlayPhase::Static;
        self.persist_visibility(true).await;
        Ok(())
    }

    /// The DOM marker stays authoritative; the persisted flag is only a
    /// restore hint, so a write failure is logged rather than raised.
    async fn persist_visibility(&self, visible: bool) {
        if let Err(e) = set_visible_flag(self.store.as_ref(), self.tab, visible).await {
            warn!(tab = self.tab, error = %e, "visibility flag not persisted");
        }
    }

    /// User-initiated open/close.
    pub async fn toggle(&mut self) -> SyncResult<()> {
        if self.is_open() {
            self.close().await
        } else {
            self.create().await
        }
    }

    /// Guaranteed visibility without disturbing an already-open instance.
    pub async fn ensure_open(&mut self) -> SyncResult<()> {
        self.create().await
    }

    /// Explicit hide, used when the coordinator redirects focus elsewhere.
    pub async fn close(&mut self) -> SyncResult<()> {
        self.check_host().await?;

        if !self.is_open() {
            return Ok(());
        }
        if self.phase == OverlayPhase::Dragging {
            self.surface.remove_capture_layer().await?;
        }
        self.surface.unmount().await?;
        self.phase = OverlayPhase::Absent;
        self.persist_visibility(false).await;
        Ok(())
    }

    pub async fn drag_start(&mut self, x: f64, y: f64) -> SyncResult<()> {
        self.check_host().await?;

        if self.phase != OverlayPhase::Static {
            return Ok(());
        }
        debug!(tab = self.tab, x, y, "drag started");
        self.surface.install_capture_layer().await?;
        self.phase = OverlayPhase::Dragging;
        Ok(())
    }

    pub async fn drag_end(&mut self) -> SyncResult<()> {
        self.check_host().await?;

        if self.phase != OverlayPhase::Dragging {
            return Ok(());
        }
        self.surface.remove_capture_layer().await?;
        self.surface.notify_panel_drag_end().await;
        self.phase = OverlayPhase::Static;
        Ok(())
    }

    /// The overlay's receiver for cross-context messages. Exhaustive over
    /// the whole surface; variants addressed to the panel fall through to
    /// it and are no-ops here.
    pub async fn handle_message(&mut self, msg: &crate::messages::ContextMessage) -> SyncResult<()> {
        use crate::messages::ContextMessage::*;

        match msg {
            ToggleOverlay => self.toggle().await,
            EnsureOverlayOpen => self.ensure_open().await,
            CloseOverlay => self.close().await,
            DragStart { x, y } => self.drag_start(*x, *y).await,
            DragEnd => self.drag_end().await,
            RefreshTranscript
            | DismissNotification
            | ShowNotification { .. }
            | QueryResult { .. } => Ok(()),
        }
    }
}

/// In-memory surface for the demo binary and tests. Counts mounts so tests
/// can assert the singleton property.
pub mod memory {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MemoryDom {
        valid: AtomicBool,
        marker: AtomicBool,
        mounted: AtomicBool,
        capture_layer: AtomicBool,
        mounts: AtomicUsize,
        drag_end_signals: AtomicUsize,
    }

    impl MemoryDom {
        pub fn new() -> Self {
            let dom = Self::default();
            dom.valid.store(true, Ordering::SeqCst);
            dom
        }

        /// Simulate a context reload: runtime handle breaks, marker stays.
        pub fn invalidate_host(&self) {
            self.valid.store(false, Ordering::SeqCst);
        }

        /// Simulate a fresh context that found the previous one's marker.
        pub fn leave_stale_marker(&self) {
            self.marker.store(true, Ordering::SeqCst);
        }

        pub fn mount_count(&self) -> usize {
            self.mounts.load(Ordering::SeqCst)
        }

        pub fn is_mounted(&self) -> bool {
            self.mounted.load(Ordering::SeqCst)
        }

        pub fn capture_layer_installed(&self) -> bool {
            self.capture_layer.load(Ordering::SeqCst)
        }

        pub fn drag_end_signals(&self) -> usize {
            self.drag_end_signals.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DomSurface for MemoryDom {
        async fn host_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }

        async fn marker_present(&self) -> bool {
            self.marker.load(Ordering::SeqCst)
        }

        async fn remove_marker(&self) -> SyncResult<()> {
            self.marker.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn mount(&self) -> SyncResult<()> {
            self.mounted.store(true, Ordering::SeqCst);
            self.marker.store(true, Ordering::SeqCst);
            self.mounts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unmount(&self) -> SyncResult<()> {
            self.mounted.store(false, Ordering::SeqCst);
            self.marker.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn install_capture_layer(&self) -> SyncResult<()> {
            self.capture_layer.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn remove_capture_layer(&self) -> SyncResult<()> {
            self.capture_layer.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_panel_drag_end(&self) {
            self.drag_end_signals.fetch_add(1, Ordering::SeqCst);
        }
    }
}
