// src/store/memory.rs

//! In-memory `SharedStore` used by the demo binary and tests.
//!
//! Semantics match the production store surface: last-write-wins per key,
//! mutation notifications on every set/remove, no transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use super::{SharedStore, StoreEvent};
use crate::error::SyncResult;

const NOTIFY_CAPACITY: usize = 256;

pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
    notify: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFY_CAPACITY)
    }

    /// Build a store with a custom notification buffer size. Small buffers
    /// make lagged-subscriber recovery reproducible in tests.
    pub fn with_capacity(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(capacity);
        Self {
            data: RwLock::new(HashMap::new()),
            notify,
        }
    }

    fn emit(&self, key: &str) {
        // No subscribers is fine; notifications are fire-and-forget.
        let _ = self.notify.send(StoreEvent {
            key: key.to_string(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.data.write().await.insert(key.to_string(), value);
        self.emit(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.data.write().await.remove(key);
        self.emit(key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.notify.subscribe()
    }
}
