// src/host/mod.rs

//! Tab host seam.
//!
//! Tabs are volatile: any of them can vanish between a lookup and the
//! operation that follows it, so every mutation re-validates and reports
//! staleness as a typed error instead of assuming success.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::messages::ContextMessage;

pub mod memory;

pub use memory::MemoryTabHost;

/// Identifier of a browser tab / UI context.
pub type TabId = u64;

#[async_trait]
pub trait TabHost: Send + Sync {
    async fn exists(&self, tab: TabId) -> bool;

    /// Bring a tab to the foreground. Stale tab yields `SyncError::Stale`.
    async fn focus(&self, tab: TabId) -> SyncResult<()>;

    /// Remove a tab. Stale tab yields `SyncError::Stale`.
    async fn close(&self, tab: TabId) -> SyncResult<()>;

    /// Point-to-point delivery to one tab context.
    async fn send(&self, tab: TabId, msg: ContextMessage) -> SyncResult<()>;

    /// Fan a message out to every live tab context. Best-effort: a context
    /// that disappeared mid-send is skipped.
    async fn broadcast(&self, msg: ContextMessage);

    async fn live_tabs(&self) -> Vec<TabId>;
}
