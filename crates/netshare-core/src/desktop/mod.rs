//! The boundary between the data-transfer core and the operating system.
//!
//! Clipboard hooks, drag-drop windows and input injection are platform
//! specific and live outside this workspace.  The core only talks to them
//! through [`LocalDesktop`] (core → OS) and [`LocalEvent`] (OS → core).
//! [`mock::MockDesktop`] is an in-memory implementation used by the tests
//! and the headless binaries.

pub mod mock;

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::payload::{ClipboardPayload, LocalFileGroup};
use crate::protocol::messages::{Edge, InputData};
use crate::transport::file_source::FileSource;

/// Commands the core issues to the local desktop.
pub trait LocalDesktop: Send + Sync {
    /// Starts an OS drag-drop of `payload` at the cursor.  File contents are
    /// pulled through `source` when the user drops.
    fn do_drag_drop(&self, operation_id: Uuid, payload: ClipboardPayload, source: Arc<dyn FileSource>);

    /// Aborts whatever drag-drop the desktop is currently showing.
    fn cancel_drop(&self);

    /// Replaces the local clipboard.  File contents are pulled through
    /// `source` on paste.
    fn set_clipboard_data(&self, operation_id: Uuid, payload: ClipboardPayload, source: Arc<dyn FileSource>);

    /// Injects one input event.
    fn apply_input(&self, input: InputData);

    /// Tells the desktop whether this machine currently owns input focus.
    fn set_input_active(&self, active: bool);
}

/// Clipboard or drag-drop content captured on this machine.
#[derive(Debug, Clone)]
pub enum LocalContent {
    Text(String),
    Image(Vec<u8>),
    /// Files stay on disk; the group remembers where each one lives.
    Files(LocalFileGroup),
}

impl LocalContent {
    /// The wire payload, without an access token.
    pub fn to_payload(&self) -> ClipboardPayload {
        match self {
            LocalContent::Text(text) => ClipboardPayload::Text(text.clone()),
            LocalContent::Image(bytes) => ClipboardPayload::Image(bytes.clone()),
            LocalContent::Files(group) => group.to_payload(),
        }
    }

    pub fn files(&self) -> Option<&LocalFileGroup> {
        match self {
            LocalContent::Files(group) => Some(group),
            _ => None,
        }
    }
}

/// Something the local desktop reports to the core.
#[derive(Debug, Clone)]
pub enum LocalEvent {
    /// The cursor hit a screen edge.
    EdgeHit(Edge),
    /// A normalised input event captured while focus is elsewhere.
    Input(InputData),
    /// The user copied something.
    ClipboardChanged {
        operation_id: Uuid,
        content: LocalContent,
    },
    /// A drag started here and the cursor left the screen with it.
    DragExited {
        operation_id: Uuid,
        content: LocalContent,
    },
    /// The user dropped a remote drag-drop on this machine.
    DropSuccess { operation_id: Uuid },
    /// The user abandoned a remote drag-drop on this machine.
    DropCancelled { operation_id: Uuid },
}
