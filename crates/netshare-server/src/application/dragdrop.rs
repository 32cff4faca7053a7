//! Drag-drop operation coordinator.
//!
//! # How a cross-machine drag works (for beginners)
//!
//! 1. The user starts dragging on some peer (the *origin*) and the cursor
//!    leaves its screen.  The origin reports the payload and the coordinator
//!    [`begin`](DragDropCoordinator::begin)s an operation.  File payloads
//!    first get an access token from the origin.
//! 2. The payload is handed to whichever peer holds input focus, so that
//!    peer can show a drag under its cursor.  When focus moves on, the
//!    payload follows it ([`handle_client_switch`]).
//! 3. The focus peer reports a drop ([`success`]) or an abandoned drag
//!    ([`cancel`]).  Only the focus peer may do either.
//! 4. For files, the receiver then pulls bytes through the relay and reports
//!    [`complete`] once done, which releases the origin's token.
//!
//! ```text
//! Dragging ──► Cancelled
//!    │
//!    └──────► TransferringFiles ──► Complete
//! ```
//!
//! Only one operation may be `Dragging` at a time.  A newer operation pushes
//! a still-transferring one into a bounded archive so its files stay
//! readable until it completes.
//!
//! [`handle_client_switch`]: DragDropCoordinator::handle_client_switch
//! [`success`]: DragDropCoordinator::success
//! [`cancel`]: DragDropCoordinator::cancel
//! [`complete`]: DragDropCoordinator::complete

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use netshare_core::desktop::LocalDesktop;
use netshare_core::domain::operation::{DragDropState, OperationId};
use netshare_core::domain::payload::ClipboardPayload;
use netshare_core::protocol::messages::{DragDropDataMessage, ShareMessage};
use netshare_core::transport::file_source::{FileSource, TransferError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peers::{Peer, PeerId, PeerRegistry};
use super::relay::FileRelay;

/// Default idle timeout of drag-drop access tokens.
pub const DEFAULT_DRAG_TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of still-transferring operations kept after being
/// superseded.
pub const DEFAULT_MAX_ARCHIVED: usize = 8;

// ── Error type ────────────────────────────────────────────────────────────────

/// Why the coordinator refused an event.
#[derive(Debug, Error)]
pub enum DragDropError {
    /// Another operation is still attached to the cursor.
    #[error("operation {current} is still being dragged")]
    Busy { current: OperationId },

    #[error("operation {0} already exists")]
    DuplicateOperation(OperationId),

    #[error("operation {0} is unknown")]
    UnknownOperation(OperationId),

    /// Only the input-focus peer may drop or cancel.
    #[error("{reporter:?} does not hold input focus and cannot {action} operation {operation}")]
    NotInputFocus {
        reporter: PeerId,
        operation: OperationId,
        action: &'static str,
    },

    #[error("cannot {action} operation {operation} while it is {state:?}")]
    InvalidTransition {
        operation: OperationId,
        state: DragDropState,
        action: &'static str,
    },

    /// The origin would not issue an access token for the files.
    #[error("no access token for the dragged files: {0}")]
    TokenUnavailable(#[source] TransferError),
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DragDropConfig {
    /// Idle timeout of tokens issued for local drags; `None` never expires.
    pub token_timeout: Option<Duration>,
    pub max_archived: usize,
}

impl Default for DragDropConfig {
    fn default() -> Self {
        Self {
            token_timeout: Some(DEFAULT_DRAG_TOKEN_TIMEOUT),
            max_archived: DEFAULT_MAX_ARCHIVED,
        }
    }
}

// ── Operation table ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct Operation {
    payload: ClipboardPayload,
    origin: Peer,
    token: Option<Uuid>,
    state: DragDropState,
    /// Peer that reported the drop.
    receiver: Option<PeerId>,
    /// Peer currently showing the payload under its cursor.
    dispatched_to: Option<Peer>,
}

/// Every live operation keyed by id, plus which one is current and which
/// are archived.
#[derive(Debug, Default)]
struct OperationTable {
    operations: HashMap<OperationId, Operation>,
    current: Option<OperationId>,
    archive: VecDeque<OperationId>,
}

impl OperationTable {
    fn check_can_begin(&self, operation_id: OperationId) -> Result<(), DragDropError> {
        if let Some(current) = self.current {
            if self.operations.get(&current).map(|op| op.state) == Some(DragDropState::Dragging) {
                return Err(DragDropError::Busy { current });
            }
        }
        if self.operations.contains_key(&operation_id) {
            return Err(DragDropError::DuplicateOperation(operation_id));
        }
        Ok(())
    }

    /// Moves the current operation out of the way of a new one.  Returns the
    /// tokens of operations evicted from the archive.
    fn retire_current(&mut self, max_archived: usize) -> Vec<(Uuid, OperationId)> {
        let mut evicted = Vec::new();
        let Some(previous) = self.current.take() else {
            return evicted;
        };
        match self.operations.get(&previous).map(|op| op.state) {
            Some(DragDropState::TransferringFiles) => {
                debug!(operation = %previous, "archiving operation still transferring files");
                self.archive.push_back(previous);
                while self.archive.len() > max_archived {
                    let Some(oldest) = self.archive.pop_front() else {
                        break;
                    };
                    if let Some(op) = self.operations.remove(&oldest) {
                        warn!(operation = %oldest, "archive full; evicting unfinished transfer");
                        evicted.extend(op.token.map(|t| (t, oldest)));
                    }
                }
            }
            Some(_) => {
                self.operations.remove(&previous);
            }
            None => {}
        }
        evicted
    }

    fn remove(&mut self, operation_id: OperationId) -> Option<Operation> {
        self.archive.retain(|id| *id != operation_id);
        if self.current == Some(operation_id) {
            self.current = None;
        }
        self.operations.remove(&operation_id)
    }

    fn is_archived(&self, operation_id: OperationId) -> bool {
        self.archive.contains(&operation_id)
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Drives every drag-drop operation through its state machine.
pub struct DragDropCoordinator {
    peers: Arc<PeerRegistry>,
    relay: Arc<FileRelay>,
    desktop: Arc<dyn LocalDesktop>,
    config: DragDropConfig,
    table: Mutex<OperationTable>,
    this: Weak<DragDropCoordinator>,
}

impl DragDropCoordinator {
    pub fn new(
        peers: Arc<PeerRegistry>,
        relay: Arc<FileRelay>,
        desktop: Arc<dyn LocalDesktop>,
        config: DragDropConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            peers,
            relay,
            desktop,
            config,
            table: Mutex::new(OperationTable::default()),
            this: this.clone(),
        })
    }

    /// Starts an operation whose payload left `origin`'s screen.
    ///
    /// File payloads are stamped with a freshly obtained access token; a
    /// local origin must pass the source path of every file.  The payload is
    /// dispatched straight away if another peer holds focus.
    ///
    /// # Errors
    ///
    /// [`DragDropError::Busy`] while another operation is `Dragging`, and
    /// [`DragDropError::TokenUnavailable`] when the origin will not issue a
    /// token.  No state is created in either case.
    pub async fn begin(
        &self,
        origin: Peer,
        operation_id: OperationId,
        payload: ClipboardPayload,
        local_files: Option<&HashMap<Uuid, PathBuf>>,
    ) -> Result<(), DragDropError> {
        self.table.lock().await.check_can_begin(operation_id)?;

        // The token request can take a full call timeout; the table stays
        // unlocked meanwhile and is re-checked afterwards.
        let (payload, token) = if payload.is_files() {
            let token = self
                .relay
                .obtain_token(&origin, operation_id, local_files, self.config.token_timeout)
                .await
                .map_err(DragDropError::TokenUnavailable)?;
            (payload.with_access_token(token), Some(token))
        } else {
            (payload, None)
        };

        let mut table = self.table.lock().await;
        if let Err(e) = table.check_can_begin(operation_id) {
            drop(table);
            if let Some(token) = token {
                self.relay.release(token, operation_id).await;
            }
            return Err(e);
        }

        for (evicted_token, evicted_op) in table.retire_current(self.config.max_archived) {
            self.relay.release(evicted_token, evicted_op).await;
        }

        let focus = self.peers.focus().await;
        let dispatched_to = if focus.id() != origin.id() {
            self.dispatch(&focus, operation_id, payload.clone());
            Some(focus)
        } else {
            None
        };

        info!(
            operation = %operation_id,
            origin = origin.label(),
            kind = payload.kind_name(),
            "drag-drop started"
        );
        table.operations.insert(
            operation_id,
            Operation {
                payload,
                origin,
                token,
                state: DragDropState::Dragging,
                receiver: None,
                dispatched_to,
            },
        );
        table.current = Some(operation_id);
        Ok(())
    }

    /// The focus peer dropped the payload.
    pub async fn success(&self, reporter: PeerId, operation_id: OperationId) -> Result<(), DragDropError> {
        let focus = self.peers.focus().await.id();
        let mut table = self.table.lock().await;
        let operation = table
            .operations
            .get_mut(&operation_id)
            .ok_or(DragDropError::UnknownOperation(operation_id))?;
        authorize(reporter, focus, operation_id, operation.state, "drop")?;

        operation.receiver = Some(reporter);
        operation.state = if operation.payload.is_files() {
            DragDropState::TransferringFiles
        } else {
            DragDropState::Complete
        };
        info!(operation = %operation_id, state = ?operation.state, "drag-drop dropped");
        notify_origin(&operation.origin, ShareMessage::DragDropSuccess { operation_id });
        Ok(())
    }

    /// The focus peer abandoned the drag.
    pub async fn cancel(&self, reporter: PeerId, operation_id: OperationId) -> Result<(), DragDropError> {
        let focus = self.peers.focus().await.id();
        let mut table = self.table.lock().await;
        let operation = table
            .operations
            .get_mut(&operation_id)
            .ok_or(DragDropError::UnknownOperation(operation_id))?;
        authorize(reporter, focus, operation_id, operation.state, "cancel")?;

        operation.state = DragDropState::Cancelled;
        info!(operation = %operation_id, "drag-drop cancelled");
        notify_origin(&operation.origin, ShareMessage::DragDropCancelled { operation_id });
        if let Some(token) = operation.token {
            self.relay.release(token, operation_id).await;
        }
        Ok(())
    }

    /// A receiver has read everything it wanted.  Repeated or late reports
    /// are ignored.
    pub async fn complete(&self, reporter: PeerId, operation_id: OperationId) -> Result<(), DragDropError> {
        let mut table = self.table.lock().await;
        let Some(operation) = table.operations.get_mut(&operation_id) else {
            debug!(operation = %operation_id, ?reporter, "completion for unknown operation ignored");
            return Ok(());
        };
        if operation.state.is_finished() {
            return Ok(());
        }
        if operation.state == DragDropState::Dragging {
            return Err(DragDropError::InvalidTransition {
                operation: operation_id,
                state: DragDropState::Dragging,
                action: "complete",
            });
        }

        operation.state = DragDropState::Complete;
        let token = operation.token;
        info!(operation = %operation_id, ?reporter, "drag-drop transfer complete");
        if table.is_archived(operation_id) {
            table.remove(operation_id);
        }
        drop(table);
        if let Some(token) = token {
            self.relay.release(token, operation_id).await;
        }
        Ok(())
    }

    /// Input focus moved from `old` to `new` while something may be dragged.
    ///
    /// The payload follows focus, except that focus returning to the origin
    /// cancels the operation.
    pub async fn handle_client_switch(&self, old: &Peer, new: &Peer) {
        let mut table = self.table.lock().await;
        let Some(current) = table.current else {
            return;
        };
        let Some(operation) = table.operations.get_mut(&current) else {
            return;
        };
        if operation.state != DragDropState::Dragging {
            return;
        }

        if new.id() == operation.origin.id() {
            info!(operation = %current, origin = new.label(), "drag returned to its origin; cancelling");
            operation.state = DragDropState::Cancelled;
            if let Some(shown_on) = operation.dispatched_to.take() {
                self.cancel_on(&shown_on);
            } else if old.id() != new.id() {
                self.cancel_on(old);
            }
            notify_origin(&operation.origin, ShareMessage::DragDropCancelled { operation_id: current });
            if let Some(token) = operation.token {
                self.relay.release(token, current).await;
            }
            return;
        }

        if operation.dispatched_to.as_ref().map(Peer::id) == Some(new.id()) {
            return;
        }
        if let Some(shown_on) = operation.dispatched_to.take() {
            self.cancel_on(&shown_on);
        }
        debug!(operation = %current, from = old.label(), to = new.label(), "drag follows focus");
        self.dispatch(new, current, operation.payload.clone());
        operation.dispatched_to = Some(new.clone());
    }

    /// The file controller expired `token`.
    pub async fn on_token_closed(&self, token: Uuid) {
        let mut table = self.table.lock().await;
        let affected: Vec<OperationId> = table
            .operations
            .iter()
            .filter(|(_, op)| op.token == Some(token))
            .map(|(id, _)| *id)
            .collect();
        for operation_id in affected {
            if table.current != Some(operation_id) {
                debug!(operation = %operation_id, "archived operation's token expired");
                table.remove(operation_id);
                continue;
            }
            let Some(operation) = table.operations.get_mut(&operation_id) else {
                continue;
            };
            operation.token = None;
            match operation.state {
                DragDropState::Dragging => {
                    warn!(operation = %operation_id, "token expired while dragging");
                    if let Some(shown_on) = operation.dispatched_to.take() {
                        self.cancel_on(&shown_on);
                    }
                    operation.state = DragDropState::Cancelled;
                }
                DragDropState::TransferringFiles => {
                    // Nothing more can be read; the transfer is over.
                    info!(operation = %operation_id, "token expired; transfer finished");
                    operation.state = DragDropState::Complete;
                }
                DragDropState::Complete | DragDropState::Cancelled => {}
            }
        }
    }

    /// `peer` disconnected: drop what it originated, and finish what it was
    /// receiving.
    pub async fn on_peer_disconnected(&self, peer: PeerId) {
        let mut table = self.table.lock().await;
        let ids: Vec<OperationId> = table.operations.keys().copied().collect();
        for operation_id in ids {
            let Some(operation) = table.operations.get_mut(&operation_id) else {
                continue;
            };
            if operation.origin.id() == peer {
                if operation.state == DragDropState::Dragging {
                    if let Some(shown_on) = operation.dispatched_to.take() {
                        if shown_on.id() != peer {
                            self.cancel_on(&shown_on);
                        }
                    }
                }
                if let Some(removed) = table.remove(operation_id) {
                    info!(operation = %operation_id, "origin disconnected; operation dropped");
                    if let Some(token) = removed.token {
                        self.relay.forget(token).await;
                    }
                }
            } else if operation.receiver == Some(peer) && operation.state == DragDropState::TransferringFiles {
                info!(operation = %operation_id, "receiver disconnected; ending transfer");
                operation.state = DragDropState::Complete;
                let token = operation.token;
                if table.is_archived(operation_id) {
                    table.remove(operation_id);
                }
                if let Some(token) = token {
                    self.relay.release(token, operation_id).await;
                }
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub async fn state_of(&self, operation_id: OperationId) -> Option<DragDropState> {
        self.table
            .lock()
            .await
            .operations
            .get(&operation_id)
            .map(|op| op.state)
    }

    pub async fn current(&self) -> Option<OperationId> {
        self.table.lock().await.current
    }

    /// Archived operation ids, oldest first.
    pub async fn archived(&self) -> Vec<OperationId> {
        self.table.lock().await.archive.iter().copied().collect()
    }

    pub async fn token_of(&self, operation_id: OperationId) -> Option<Uuid> {
        self.table
            .lock()
            .await
            .operations
            .get(&operation_id)
            .and_then(|op| op.token)
    }

    // ── Outbound effects ──────────────────────────────────────────────────

    fn dispatch(&self, to: &Peer, operation_id: OperationId, payload: ClipboardPayload) {
        match to {
            Peer::Local => self.desktop.do_drag_drop(operation_id, payload, self.local_source()),
            Peer::Remote(remote) => {
                let msg = ShareMessage::DragDropData(DragDropDataMessage { operation_id, payload });
                if let Err(e) = remote.connection.send(msg) {
                    warn!(operation = %operation_id, "drag payload not sent to {}: {e}", remote.name);
                }
            }
        }
    }

    fn cancel_on(&self, peer: &Peer) {
        match peer {
            Peer::Local => self.desktop.cancel_drop(),
            Peer::Remote(remote) => {
                if let Err(e) = remote.connection.send(ShareMessage::CancelAnyDragDrop) {
                    debug!("cancel not sent to {}: {e}", remote.name);
                }
            }
        }
    }

    fn local_source(&self) -> Arc<dyn FileSource> {
        Arc::new(DragDropFiles {
            relay: self.relay.clone(),
            coordinator: self.this.clone(),
        })
    }
}

fn authorize(
    reporter: PeerId,
    focus: PeerId,
    operation: OperationId,
    state: DragDropState,
    action: &'static str,
) -> Result<(), DragDropError> {
    if reporter != focus {
        return Err(DragDropError::NotInputFocus {
            reporter,
            operation,
            action,
        });
    }
    if state != DragDropState::Dragging {
        return Err(DragDropError::InvalidTransition {
            operation,
            state,
            action,
        });
    }
    Ok(())
}

fn notify_origin(origin: &Peer, msg: ShareMessage) {
    if let Peer::Remote(remote) = origin {
        if let Err(e) = remote.connection.send(msg) {
            debug!("origin {} not notified: {e}", remote.name);
        }
    }
}

/// File source handed to the local desktop with a dropped payload.
struct DragDropFiles {
    relay: Arc<FileRelay>,
    coordinator: Weak<DragDropCoordinator>,
}

#[async_trait]
impl FileSource for DragDropFiles {
    async fn read(&self, token: Uuid, file_id: Uuid, len: u32) -> Result<Vec<u8>, TransferError> {
        self.relay.read(token, file_id, len).await
    }

    async fn close_stream(&self, token: Uuid, file_id: Uuid) {
        self.relay.close_stream(token, file_id).await;
    }

    async fn complete(&self, operation_id: Uuid) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if let Err(e) = coordinator.complete(PeerId::Local, operation_id).await {
            warn!(operation = %operation_id, "local completion rejected: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::peers::Layout;
    use netshare_core::desktop::mock::{DesktopCall, MockDesktop};
    use netshare_core::domain::payload::LocalFileGroup;
    use netshare_core::files::{FileAccessConfig, FileAccessController};

    struct Fixture {
        coordinator: Arc<DragDropCoordinator>,
        relay: Arc<FileRelay>,
        desktop: Arc<MockDesktop>,
        _dir: tempfile::TempDir,
        files: LocalFileGroup,
    }

    fn fixture(max_archived: usize) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("drop");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("one.txt"), b"first file").unwrap();
        let files = LocalFileGroup::scan(&[root]).expect("scan");

        let (controller, _closed) = FileAccessController::new(FileAccessConfig::default());
        let relay = Arc::new(FileRelay::new(Arc::new(controller)));
        let desktop = Arc::new(MockDesktop::new());
        let peers = Arc::new(PeerRegistry::new("desk", 8, Layout::new()));
        let coordinator = DragDropCoordinator::new(
            peers,
            relay.clone(),
            desktop.clone(),
            DragDropConfig {
                token_timeout: None,
                max_archived,
            },
        );
        Fixture {
            coordinator,
            relay,
            desktop,
            _dir: dir,
            files,
        }
    }

    async fn begin_local_files(f: &Fixture) -> OperationId {
        let op = Uuid::new_v4();
        f.coordinator
            .begin(Peer::Local, op, f.files.to_payload(), Some(f.files.sources()))
            .await
            .expect("begin");
        op
    }

    #[tokio::test]
    async fn test_begin_stamps_token_and_stays_with_origin_while_it_has_focus() {
        // Arrange
        let f = fixture(8);

        // Act
        let op = begin_local_files(&f).await;

        // Assert
        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Dragging));
        assert_eq!(f.coordinator.current().await, Some(op));
        let token = f.coordinator.token_of(op).await.expect("token");
        assert!(f.relay.files().has_token(token).await);
        assert!(f.desktop.calls().is_empty(), "origin holds focus; nothing dispatched");
    }

    #[tokio::test]
    async fn test_second_begin_while_dragging_is_refused() {
        // Arrange
        let f = fixture(8);
        let a = begin_local_files(&f).await;

        // Act
        let result = f
            .coordinator
            .begin(Peer::Local, Uuid::new_v4(), ClipboardPayload::Text("b".into()), None)
            .await;

        // Assert
        assert!(matches!(result, Err(DragDropError::Busy { current }) if current == a));
        assert_eq!(f.coordinator.state_of(a).await, Some(DragDropState::Dragging));
        assert_eq!(f.coordinator.current().await, Some(a));
    }

    #[tokio::test]
    async fn test_local_files_without_sources_create_no_operation() {
        let f = fixture(8);
        let op = Uuid::new_v4();

        let result = f
            .coordinator
            .begin(Peer::Local, op, f.files.to_payload(), None)
            .await;

        assert!(matches!(result, Err(DragDropError::TokenUnavailable(_))));
        assert_eq!(f.coordinator.state_of(op).await, None);
        assert_eq!(f.coordinator.current().await, None);
    }

    #[tokio::test]
    async fn test_inline_drop_goes_straight_to_complete() {
        let f = fixture(8);
        let op = Uuid::new_v4();
        f.coordinator
            .begin(Peer::Local, op, ClipboardPayload::Text("hi".into()), None)
            .await
            .unwrap();

        f.coordinator.success(PeerId::Local, op).await.unwrap();

        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Complete));
    }

    #[tokio::test]
    async fn test_superseded_transfer_is_archived_until_complete() {
        // Arrange
        let f = fixture(8);
        let a = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, a).await.unwrap();
        let token_a = f.coordinator.token_of(a).await.unwrap();
        let file_id = *f.files.sources().keys().next().unwrap();

        // Act
        let b = begin_local_files(&f).await;

        // Assert
        assert_eq!(f.coordinator.current().await, Some(b));
        assert_eq!(f.coordinator.archived().await, vec![a]);
        assert_eq!(f.relay.read(token_a, file_id, 5).await.unwrap(), b"first");

        f.coordinator.complete(PeerId::Local, a).await.unwrap();
        assert!(f.coordinator.archived().await.is_empty());
        assert_eq!(f.coordinator.state_of(a).await, None);
        assert!(!f.relay.files().has_token(token_a).await);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent_and_refused_while_dragging() {
        // Arrange
        let f = fixture(8);
        let op = begin_local_files(&f).await;

        // Act / Assert
        let early = f.coordinator.complete(PeerId::Local, op).await;
        assert!(matches!(early, Err(DragDropError::InvalidTransition { .. })));

        f.coordinator.success(PeerId::Local, op).await.unwrap();
        f.coordinator.complete(PeerId::Local, op).await.unwrap();
        f.coordinator.complete(PeerId::Local, op).await.unwrap();
        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Complete));
        f.coordinator.complete(PeerId::Local, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_archive_eviction_releases_oldest_token() {
        // Arrange
        let f = fixture(1);
        let a = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, a).await.unwrap();
        let token_a = f.coordinator.token_of(a).await.unwrap();
        let b = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, b).await.unwrap();

        // Act
        let c = begin_local_files(&f).await;

        // Assert
        assert_eq!(f.coordinator.current().await, Some(c));
        assert_eq!(f.coordinator.archived().await, vec![b]);
        assert!(!f.relay.files().has_token(token_a).await);
    }

    #[tokio::test]
    async fn test_cancel_releases_token() {
        let f = fixture(8);
        let op = begin_local_files(&f).await;
        let token = f.coordinator.token_of(op).await.unwrap();

        f.coordinator.cancel(PeerId::Local, op).await.unwrap();

        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Cancelled));
        assert!(!f.relay.files().has_token(token).await);
    }

    #[tokio::test]
    async fn test_expired_token_drops_archived_operation() {
        // Arrange
        let f = fixture(8);
        let a = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, a).await.unwrap();
        let token_a = f.coordinator.token_of(a).await.unwrap();
        begin_local_files(&f).await;

        // Act
        f.coordinator.on_token_closed(token_a).await;

        // Assert
        assert!(f.coordinator.archived().await.is_empty());
        assert_eq!(f.coordinator.state_of(a).await, None);
    }

    #[tokio::test]
    async fn test_expired_token_completes_current_transfer() {
        // Arrange
        let f = fixture(8);
        let op = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, op).await.unwrap();
        let token = f.coordinator.token_of(op).await.unwrap();

        // Act
        f.coordinator.on_token_closed(token).await;

        // Assert
        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Complete));
        assert_eq!(f.coordinator.token_of(op).await, None);
        assert!(!f.desktop.calls().contains(&DesktopCall::CancelDrop));
    }

    #[tokio::test]
    async fn test_expired_token_cancels_current_drag() {
        let f = fixture(8);
        let op = begin_local_files(&f).await;
        let token = f.coordinator.token_of(op).await.unwrap();

        f.coordinator.on_token_closed(token).await;

        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Cancelled));
    }

    #[tokio::test]
    async fn test_local_drop_completion_reaches_coordinator() {
        // Arrange
        let f = fixture(8);
        let op = begin_local_files(&f).await;
        f.coordinator.success(PeerId::Local, op).await.unwrap();
        let source = f.coordinator.local_source();

        // Act
        source.complete(op).await;

        // Assert
        assert_eq!(f.coordinator.state_of(op).await, Some(DragDropState::Complete));
        assert!(!f.desktop.calls().contains(&DesktopCall::CancelDrop));
    }
}
