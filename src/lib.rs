// src/lib.rs

pub mod config;
pub mod coordinator;
pub mod epoch;
pub mod error;
pub mod host;
pub mod messages;
pub mod notify;
pub mod overlay;
pub mod panel;
pub mod reasoning;
pub mod reminders;
pub mod store;
pub mod transcript;

pub use coordinator::{Coordinator, QueryOutcome};
pub use error::{SyncError, SyncResult};
pub use panel::Panel;
