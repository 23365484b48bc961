// src/transcript.rs

//! Shared conversation transcript and its convergence rule.
//!
//! Multiple independent writers exist (the coordinator persisting a reply, a
//! panel persisting a user turn), so no single writer owns sequence order.
//! Convergence uses a total-order proxy: length first, then content
//! equality. A longer history is never silently truncated by a shorter one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::store::{keys, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }
}

/// Pick the winning transcript between a remote (store) copy and a local
/// in-memory copy.
///
/// Rules, in order:
/// 1. Longer remote wins.
/// 2. Equal length but differing content: remote wins (treated as a
///    concurrent update from another writer).
/// 3. Empty local against non-empty remote: remote wins.
/// 4. Otherwise local wins, preserving an in-flight optimistic append made
///    against a stale read.
///
/// Commutative in effect and idempotent: re-running the merge on its own
/// output is a no-op, which is what lets every reader re-merge on every
/// notification without coordination.
pub fn merge_local(remote: &[Message], local: &[Message]) -> Vec<Message> {
    if remote.len() > local.len() {
        return remote.to_vec();
    }
    if remote.len() == local.len() && remote != local {
        return remote.to_vec();
    }
    if local.is_empty() && !remote.is_empty() {
        return remote.to_vec();
    }
    local.to_vec()
}

/// Persist a transcript to every storage alias, canonical key last, so a
/// reader observing only a prefix of the writes never sees the canonical key
/// ahead of a stale alias.
///
/// A failure mid-batch aborts the remaining writes (keeping that ordering
/// invariant) and, when earlier keys already took the write, reports a
/// `Partial` rather than masking them as a plain transient failure.
pub async fn persist(store: &dyn SharedStore, transcript: &[Message]) -> SyncResult<()> {
    let value = serde_json::to_value(transcript)?;
    let total = keys::TRANSCRIPT_ALIASES.len() + 1;
    let mut succeeded = 0usize;
    for alias in keys::TRANSCRIPT_ALIASES {
        if let Err(e) = store.set(alias, value.clone()).await {
            return Err(batch_failure(e, succeeded, total));
        }
        succeeded += 1;
    }
    store
        .set(keys::TRANSCRIPT, value)
        .await
        .map_err(|e| batch_failure(e, succeeded, total))
}

/// Load the transcript, falling back to legacy aliases when the canonical
/// key is absent (old installs that never wrote it).
pub async fn load(store: &dyn SharedStore) -> SyncResult<Vec<Message>> {
    if let Some(value) = store.get(keys::TRANSCRIPT).await? {
        return decode(value);
    }
    for alias in keys::TRANSCRIPT_ALIASES {
        if let Some(value) = store.get(alias).await? {
            debug!(alias, "transcript loaded from legacy alias");
            return decode(value);
        }
    }
    Ok(Vec::new())
}

/// Clear every alias, canonical key last. Used by the epoch guard and by an
/// explicit "new conversation". Reports partial completion the same way
/// `persist` does.
pub async fn clear(store: &dyn SharedStore) -> SyncResult<()> {
    let total = keys::TRANSCRIPT_ALIASES.len() + 1;
    let mut succeeded = 0usize;
    for alias in keys::TRANSCRIPT_ALIASES {
        if let Err(e) = store.remove(alias).await {
            return Err(batch_failure(e, succeeded, total));
        }
        succeeded += 1;
    }
    store
        .remove(keys::TRANSCRIPT)
        .await
        .map_err(|e| batch_failure(e, succeeded, total))
}

/// Zero completed writes surface the underlying error unchanged; anything
/// else is a partial completion whose succeeded subset stays in place.
fn batch_failure(err: SyncError, succeeded: usize, total: usize) -> SyncError {
    if succeeded == 0 {
        err
    } else {
        SyncError::Partial {
            succeeded,
            failed: total - succeeded,
        }
    }
}

fn decode(value: Value) -> SyncResult<Vec<Message>> {
    serde_json::from_value(value)
        .map_err(|e| SyncError::Transient(format!("malformed transcript: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreEvent};
    use tokio::sync::broadcast;

    fn msgs(texts: &[&str]) -> Vec<Message> {
        texts.iter().map(|t| Message::user(*t)).collect()
    }

    /// Store that refuses every write to one key.
    struct RejectingStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    #[async_trait::async_trait]
    impl SharedStore for RejectingStore {
        async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> SyncResult<()> {
            if key == self.reject {
                return Err(SyncError::Transient("write refused".to_string()));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> SyncResult<()> {
            if key == self.reject {
                return Err(SyncError::Transient("write refused".to_string()));
            }
            self.inner.remove(key).await
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let x = msgs(&["a", "b", "c"]);
        assert_eq!(merge_local(&x, &x), x);

        let empty: Vec<Message> = vec![];
        assert_eq!(merge_local(&empty, &empty), empty);
    }

    #[test]
    fn test_longer_remote_wins_regardless_of_content() {
        let remote = msgs(&["x", "y", "z"]);
        let local = msgs(&["a"]);
        assert_eq!(merge_local(&remote, &local), remote);
    }

    #[test]
    fn test_merge_prefers_remote_on_equal_length_conflict() {
        let remote = msgs(&["a", "b"]);
        let local = msgs(&["a", "c"]);
        assert_eq!(merge_local(&remote, &local), remote);
    }

    #[test]
    fn test_local_optimistic_append_survives_stale_read() {
        // Local appended one message against a read that is now stale but
        // still a prefix: local is longer, local wins.
        let remote = msgs(&["a", "b"]);
        let local = msgs(&["a", "b", "c"]);
        assert_eq!(merge_local(&remote, &local), local);
    }

    #[test]
    fn test_empty_local_takes_remote() {
        let remote = msgs(&["a"]);
        let local: Vec<Message> = vec![];
        assert_eq!(merge_local(&remote, &local), remote);
    }

    #[tokio::test]
    async fn test_persist_mirrors_all_aliases() {
        let store = MemoryStore::new();
        let transcript = msgs(&["hello"]);

        persist(&store, &transcript).await.unwrap();

        for alias in keys::TRANSCRIPT_ALIASES {
            assert!(store.get(alias).await.unwrap().is_some(), "{alias} unset");
        }
        assert_eq!(load(&store).await.unwrap(), transcript);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_legacy_alias() {
        let store = MemoryStore::new();
        let legacy = serde_json::to_value(msgs(&["old"])).unwrap();
        store.set("chat_history", legacy).await.unwrap();

        assert_eq!(load(&store).await.unwrap(), msgs(&["old"]));
    }

    #[tokio::test]
    async fn test_canonical_write_failure_reports_partial() {
        let store = RejectingStore {
            inner: MemoryStore::new(),
            reject: keys::TRANSCRIPT,
        };

        let err = persist(&store, &msgs(&["a"])).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Partial {
                succeeded: 2,
                failed: 1
            }
        ));
        // The alias writes are never rolled back.
        for alias in keys::TRANSCRIPT_ALIASES {
            assert!(store.get(alias).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_first_write_failure_stays_transient() {
        let store = RejectingStore {
            inner: MemoryStore::new(),
            reject: keys::TRANSCRIPT_ALIASES[0],
        };

        let err = persist(&store, &msgs(&["a"])).await.unwrap_err();

        assert!(matches!(err, SyncError::Transient(_)));
        assert!(store.get(keys::TRANSCRIPT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_every_alias() {
        let store = MemoryStore::new();
        persist(&store, &msgs(&["a"])).await.unwrap();

        clear(&store).await.unwrap();

        assert!(store.get(keys::TRANSCRIPT).await.unwrap().is_none());
        for alias in keys::TRANSCRIPT_ALIASES {
            assert!(store.get(alias).await.unwrap().is_none());
        }
    }
}
