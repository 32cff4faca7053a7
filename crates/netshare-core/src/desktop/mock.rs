//! In-memory desktop that records every command instead of touching the OS.
//!
//! The headless binaries run on it, and tests use it to observe what the core
//! asked the desktop to do.  File sources handed over with drag-drop and
//! clipboard payloads are kept so a test can act as the user and pull the
//! files afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;
use uuid::Uuid;

use crate::desktop::LocalDesktop;
use crate::domain::payload::ClipboardPayload;
use crate::protocol::messages::InputData;
use crate::transport::file_source::FileSource;

/// One recorded [`LocalDesktop`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopCall {
    DragDrop {
        operation_id: Uuid,
        payload: ClipboardPayload,
    },
    CancelDrop,
    SetClipboard {
        operation_id: Uuid,
        payload: ClipboardPayload,
    },
    Input(InputData),
    InputActive(bool),
}

/// A desktop that records calls in order.
#[derive(Default)]
pub struct MockDesktop {
    calls: Mutex<Vec<DesktopCall>>,
    sources: Mutex<HashMap<Uuid, Arc<dyn FileSource>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<DesktopCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// The file source handed over with `operation_id`, if any.
    pub fn file_source(&self, operation_id: Uuid) -> Option<Arc<dyn FileSource>> {
        lock(&self.sources).get(&operation_id).cloned()
    }

    fn record(&self, call: DesktopCall) {
        lock(&self.calls).push(call);
    }
}

impl LocalDesktop for MockDesktop {
    fn do_drag_drop(&self, operation_id: Uuid, payload: ClipboardPayload, source: Arc<dyn FileSource>) {
        info!(%operation_id, kind = payload.kind_name(), "desktop: drag-drop");
        lock(&self.sources).insert(operation_id, source);
        self.record(DesktopCall::DragDrop {
            operation_id,
            payload,
        });
    }

    fn cancel_drop(&self) {
        info!("desktop: cancel drop");
        self.record(DesktopCall::CancelDrop);
    }

    fn set_clipboard_data(&self, operation_id: Uuid, payload: ClipboardPayload, source: Arc<dyn FileSource>) {
        info!(%operation_id, kind = payload.kind_name(), "desktop: set clipboard");
        lock(&self.sources).insert(operation_id, source);
        self.record(DesktopCall::SetClipboard {
            operation_id,
            payload,
        });
    }

    fn apply_input(&self, input: InputData) {
        self.record(DesktopCall::Input(input));
    }

    fn set_input_active(&self, active: bool) {
        info!(active, "desktop: input focus");
        self.record(DesktopCall::InputActive(active));
    }
}
