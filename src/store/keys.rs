// src/store/keys.rs

//! Logical store keys.
//!
//! The transcript is mirrored under legacy aliases kept from earlier
//! releases; writers update every alias, aliases first and the canonical key
//! last, so a reader never observes the canonical key ahead of a stale
//! alias.

/// Canonical transcript key. Always written last.
pub const TRANSCRIPT: &str = "transcript";

/// Legacy-compatible aliases for the transcript, written before the
/// canonical key.
pub const TRANSCRIPT_ALIASES: &[&str] = &["chat_history", "tabmind_messages"];

/// Last-known reasoning-service session epoch.
pub const SESSION_EPOCH: &str = "session_epoch";

/// Whether the overlay should be visible on panel restore.
pub const OVERLAY_VISIBLE: &str = "overlay_visible_flag";

/// A fired reminder awaiting display/dismissal: `{ text, created_at }`.
pub const PENDING_NOTIFICATION: &str = "pending_notification";

/// Set once the cleanup prompt has been asked; gates re-asking.
pub const ASKED_CLEANUP_ONCE: &str = "asked_cleanup_once";
