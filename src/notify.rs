// src/notify.rs

//! OS-level notification seam.
//!
//! A fired reminder is broadcast to every live tab context *and* pushed
//! through this channel, because a tab context may not currently be
//! rendering anything.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

/// Default notifier for headless runs: logs instead of raising an OS toast.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) {
        info!(title, body, "os notification");
    }
}
