// src/host/memory.rs

//! In-memory `TabHost` for the demo binary and tests.
//!
//! Each open tab gets an unbounded mailbox; dropping the receiver models a
//! closed or reloaded tab context that simply never replies.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{TabHost, TabId};
use crate::error::{SyncError, SyncResult};
use crate::messages::ContextMessage;

#[derive(Default)]
pub struct MemoryTabHost {
    tabs: RwLock<HashMap<TabId, mpsc::UnboundedSender<ContextMessage>>>,
    focused: RwLock<Option<TabId>>,
}

impl MemoryTabHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tab and return its mailbox receiver (the tab context's inbox).
    pub async fn open_tab(&self, tab: TabId) -> mpsc::UnboundedReceiver<ContextMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tabs.write().await.insert(tab, tx);
        rx
    }

    pub async fn focused(&self) -> Option<TabId> {
        *self.focused.read().await
    }
}

#[async_trait]
impl TabHost for MemoryTabHost {
    async fn exists(&self, tab: TabId) -> bool {
        self.tabs.read().await.contains_key(&tab)
    }

    async fn focus(&self, tab: TabId) -> SyncResult<()> {
        if !self.exists(tab).await {
            return Err(SyncError::Stale(format!("tab {tab} is gone")));
        }
        *self.focused.write().await = Some(tab);
        Ok(())
    }

    async fn close(&self, tab: TabId) -> SyncResult<()> {
        if self.tabs.write().await.remove(&tab).is_none() {
            return Err(SyncError::Stale(format!("tab {tab} is gone")));
        }
        let mut focused = self.focused.write().await;
        if *focused == Some(tab) {
            *focused = None;
        }
        Ok(())
    }

    async fn send(&self, tab: TabId, msg: ContextMessage) -> SyncResult<()> {
        let tabs = self.tabs.read().await;
        let tx = tabs
            .get(&tab)
            .ok_or_else(|| SyncError::Stale(format!("tab {tab} is gone")))?;
        tx.send(msg)
            .map_err(|_| SyncError::Stale(format!("tab {tab} mailbox closed")))
    }

    async fn broadcast(&self, msg: ContextMessage) {
        let tabs = self.tabs.read().await;
        for (tab, tx) in tabs.iter() {
            if tx.send(msg.clone()).is_err() {
                debug!(tab, "skipping broadcast to closed mailbox");
            }
        }
    }

    async fn live_tabs(&self) -> Vec<TabId> {
        self.tabs.read().await.keys().copied().collect()
    }
}
