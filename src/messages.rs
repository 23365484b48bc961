// src/messages.rs

//! Cross-context message surface.
//!
//! Every point-to-point or broadcast message between the coordinator,
//! overlays, and panels is one closed tagged union, exhaustively matched at
//! each receiver. There is no string-tag dispatch anywhere in the crate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reasoning::Mode;

/// Messages exchanged between contexts (coordinator, overlay instances,
/// panels). Serialized with an explicit tag so store-relayed copies stay
/// readable across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextMessage {
    /// User-initiated open/close of a tab's overlay.
    ToggleOverlay,
    /// Coordinator wants guaranteed visibility without disturbing an
    /// already-open instance.
    EnsureOverlayOpen,
    /// Coordinator-initiated hide (e.g. focus redirected to another tab).
    CloseOverlay,
    /// The shared transcript changed; re-merge and re-render.
    RefreshTranscript,
    /// Panel drag started at viewport coordinates.
    DragStart { x: f64, y: f64 },
    /// Panel drag ended; the panel resumes its own pointer handling.
    DragEnd,
    /// A reminder notification was dismissed somewhere; hide it everywhere.
    DismissNotification,
    /// Show a fired-reminder notification in every live tab context.
    ShowNotification { text: String },
    /// Outcome of a dispatched query, correlated back to its request.
    QueryResult {
        request_id: Uuid,
        reply: String,
        mode: Mode,
    },
}
