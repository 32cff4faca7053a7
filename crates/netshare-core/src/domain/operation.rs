//! Lifecycle of a cross-peer drag-drop operation.
//!
//! ```text
//! Dragging ──► Cancelled
//!    │
//!    └──────► TransferringFiles ──► Complete
//! ```
//!
//! Inline payloads (text, images) have nothing to stream, so a successful
//! drop takes them straight from `Dragging` to `Complete`.

use uuid::Uuid;

/// Identifier of one clipboard or drag-drop operation.
pub type OperationId = Uuid;

/// State of a drag-drop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragDropState {
    /// The payload is attached to the cursor and can still be dropped or cancelled.
    Dragging,
    /// Dropped; the receiver is still pulling file bytes from the origin.
    TransferringFiles,
    /// Every byte was delivered (or there were none to deliver).
    Complete,
    /// The drag ended without a drop.
    Cancelled,
}

impl DragDropState {
    /// Returns `true` once nothing more can happen to the operation.
    pub fn is_finished(self) -> bool {
        matches!(self, DragDropState::Complete | DragDropState::Cancelled)
    }
}
