// src/error.rs

//! Closed error taxonomy for every cross-context operation.
//!
//! Nothing in this crate lets a raw fault escape into a context that may be
//! mid-teardown; public operations catch at their boundary and return one of
//! these variants.

/// Error taxonomy for synchronization, dispatch, and scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network or service unavailability. Retried or ignored; never clears
    /// local state.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The target tab/overlay no longer exists. Logged, no-op.
    #[error("stale target: {0}")]
    Stale(String),

    /// A non-recurring reminder time already elapsed. User-visible rejection,
    /// zero side effects.
    #[error("the requested time has already passed")]
    PastDeadline,

    /// Our own runtime handle became invalid (context reloaded underneath
    /// us). Degrades to a "please reload" message, never a panic.
    #[error("host context invalidated; reload required")]
    HostInvalidated,

    /// Some but not all of a batch succeeded. The succeeded subset is never
    /// rolled back.
    #[error("partial completion: {succeeded} succeeded, {failed} failed")]
    Partial { succeeded: usize, failed: usize },
}

impl SyncError {
    /// Whether a failure should surface a highlighted banner in addition to
    /// the inline transcript message.
    pub fn wants_banner(&self) -> bool {
        matches!(self, SyncError::PastDeadline | SyncError::HostInvalidated)
    }
}

/// Convert plumbing errors at the boundary into the transient bucket.
impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Transient(format!("serialization: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
