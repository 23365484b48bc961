// src/store/mod.rs

//! Shared key-value store seam.
//!
//! The store is the only resource mutated across contexts. It is
//! asynchronous, non-transactional, and last-write-wins per key; readers get
//! mutation notifications and must re-derive state from the keys themselves.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::SyncResult;

pub mod keys;
pub mod memory;

pub use memory::MemoryStore;

/// One store mutation, delivered to every subscriber. Carries only the key;
/// subscribers re-read the value, so a lagging receiver converges on the
/// latest write rather than replaying history.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: String,
}

/// Async key-value store visible to all contexts.
///
/// No transactions: a multi-key update that must look atomic to readers is
/// ordered by the writer (less-authoritative keys first, canonical key
/// last), so observing only a prefix of the writes never yields a
/// contradictory state.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> SyncResult<()>;
    async fn remove(&self, key: &str) -> SyncResult<()>;

    /// Subscribe to mutation notifications. Delivery is best-effort: a slow
    /// subscriber may observe a lagged receiver and should re-read.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
