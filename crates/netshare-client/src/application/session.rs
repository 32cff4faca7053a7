//! Client session: everything the client does with one server connection.
//!
//! # Two roles (for beginners)
//!
//! A client is both an **origin** and a **receiver**:
//!
//! - As an origin it announces local copies and drags to the server and
//!   remembers where each file lives.  When the server later asks for a
//!   token (`RequestFileGroupToken`) the session issues one from its own
//!   [`FileAccessController`] and serves the reads that follow.
//! - As a receiver it hands payloads from the server to the desktop, along
//!   with a [`RemoteFileSource`] that pulls file bytes back through the
//!   server.
//!
//! Origin bookkeeping is bounded; the oldest entry is forgotten (and its
//! token deleted) once more than [`MAX_ORIGIN_OPERATIONS`] are remembered.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use netshare_core::desktop::{LocalContent, LocalDesktop, LocalEvent};
use netshare_core::domain::operation::OperationId;
use netshare_core::files::FileAccessController;
use netshare_core::protocol::messages::{
    ClipboardDataMessage, DragDropDataMessage, EdgeStatesMessage, Envelope,
    FileStreamReadRequestMessage, ShareMessage,
};
use netshare_core::transport::connection::{Connection, ConnectionError};
use netshare_core::transport::file_source::RemoteFileSource;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local operations remembered for later token requests.
pub const MAX_ORIGIN_OPERATIONS: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to a server")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A local copy or drag whose files this client serves.
#[derive(Debug)]
struct OriginOperation {
    id: OperationId,
    sources: HashMap<Uuid, PathBuf>,
    token: Option<Uuid>,
}

#[derive(Debug, Default)]
struct SessionState {
    connection: Option<Connection>,
    origins: VecDeque<OriginOperation>,
    edge_states: EdgeStatesMessage,
    input_active: bool,
}

impl SessionState {
    fn origin_mut(&mut self, operation_id: OperationId) -> Option<&mut OriginOperation> {
        self.origins.iter_mut().find(|op| op.id == operation_id)
    }
}

pub struct ClientSession {
    desktop: Arc<dyn LocalDesktop>,
    files: Arc<FileAccessController>,
    token_timeout: Option<Duration>,
    state: Mutex<SessionState>,
}

impl ClientSession {
    /// `token_timeout` is the idle timeout of tokens issued to the server.
    pub fn new(
        desktop: Arc<dyn LocalDesktop>,
        files: Arc<FileAccessController>,
        token_timeout: Option<Duration>,
    ) -> Self {
        Self {
            desktop,
            files,
            token_timeout,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn files(&self) -> &Arc<FileAccessController> {
        &self.files
    }

    /// Starts using `connection` for outbound messages.
    pub async fn attach(&self, connection: Connection) {
        self.state.lock().await.connection = Some(connection);
    }

    /// Forgets the connection and every origin operation.  Tokens issued to
    /// the old server are deleted; a new server cannot know them.
    pub async fn detach(&self) {
        let origins = {
            let mut state = self.state.lock().await;
            state.connection = None;
            state.input_active = false;
            std::mem::take(&mut state.origins)
        };
        for op in origins {
            if let Some(token) = op.token {
                self.files.delete_token(token).await;
            }
        }
    }

    // ── Messages from the server ──────────────────────────────────────────

    pub async fn handle_server_message(&self, connection: &Connection, envelope: Envelope) {
        let request_id = envelope.id;
        match envelope.message {
            ShareMessage::RequestFileGroupToken { operation_id } => {
                let answer = self.issue_token(operation_id).await;
                send_reply(connection, request_id, answer);
            }
            ShareMessage::FileStreamReadRequest(request) => {
                let answer = self.serve_read(request).await;
                send_reply(connection, request_id, answer);
            }
            ShareMessage::FileStreamCloseRequest(request) => {
                if let Err(e) = self.files.close_stream(request.token, request.file_id).await {
                    debug!("close-stream ignored: {e}");
                }
            }
            ShareMessage::DragDropComplete { operation_id } => self.finish_origin(operation_id).await,
            ShareMessage::DragDropData(DragDropDataMessage { operation_id, payload }) => {
                let source = Arc::new(RemoteFileSource::new(connection.clone()));
                self.desktop.do_drag_drop(operation_id, payload, source);
            }
            ShareMessage::ClipboardData(ClipboardDataMessage { operation_id, payload }) => {
                let source = Arc::new(RemoteFileSource::new(connection.clone()));
                self.desktop.set_clipboard_data(operation_id, payload, source);
            }
            ShareMessage::CancelAnyDragDrop => self.desktop.cancel_drop(),
            ShareMessage::InputData(input) => self.desktop.apply_input(input),
            ShareMessage::ClientActive => self.set_input_active(true).await,
            ShareMessage::ClientInactive => self.set_input_active(false).await,
            ShareMessage::ClientEdgeStates(states) => {
                debug!(?states, "edge states received");
                self.state.lock().await.edge_states = states;
            }
            ShareMessage::DragDropSuccess { operation_id } => {
                info!(operation = %operation_id, "our drag was dropped on another machine");
            }
            ShareMessage::DragDropCancelled { operation_id } => {
                info!(operation = %operation_id, "our drag was cancelled");
            }
            other => debug!(message = ?other.message_type(), "unexpected message ignored"),
        }
    }

    async fn issue_token(&self, operation_id: OperationId) -> ShareMessage {
        let mut state = self.state.lock().await;
        let Some(op) = state.origin_mut(operation_id) else {
            warn!(operation = %operation_id, "token requested for unknown operation");
            return ShareMessage::FileStreamReadError {
                reason: format!("operation {operation_id} is unknown"),
            };
        };
        if let Some(token) = op.token {
            return ShareMessage::FileGroupTokenResponse { token };
        }
        let token = self
            .files
            .create_token(op.sources.clone(), self.token_timeout)
            .await;
        op.token = Some(token);
        ShareMessage::FileGroupTokenResponse { token }
    }

    async fn serve_read(&self, request: FileStreamReadRequestMessage) -> ShareMessage {
        match self
            .files
            .read(request.token, request.file_id, request.read_len as usize)
            .await
        {
            Ok(data) => ShareMessage::FileStreamReadResponse { data },
            Err(e) => {
                debug!(token = %request.token, file_id = %request.file_id, "read failed: {e}");
                ShareMessage::FileStreamReadError { reason: e.to_string() }
            }
        }
    }

    async fn finish_origin(&self, operation_id: OperationId) {
        let finished = {
            let mut state = self.state.lock().await;
            let index = state.origins.iter().position(|op| op.id == operation_id);
            index.and_then(|i| state.origins.remove(i))
        };
        match finished {
            Some(op) => {
                info!(operation = %operation_id, "server released our files");
                if let Some(token) = op.token {
                    self.files.delete_token(token).await;
                }
            }
            None => debug!(operation = %operation_id, "completion for unknown operation ignored"),
        }
    }

    async fn set_input_active(&self, active: bool) {
        self.state.lock().await.input_active = active;
        self.desktop.set_input_active(active);
    }

    // ── Events from the local desktop ─────────────────────────────────────

    /// Reports a local event to the server.
    ///
    /// # Errors
    ///
    /// Fails if no server is attached or the message cannot be queued.
    pub async fn handle_local_event(&self, event: LocalEvent) -> Result<(), SessionError> {
        let msg = match event {
            LocalEvent::EdgeHit(edge) => ShareMessage::EdgeHit(edge),
            LocalEvent::Input(_) => {
                debug!("client does not forward captured input");
                return Ok(());
            }
            LocalEvent::ClipboardChanged {
                operation_id,
                content,
            } => {
                self.remember_origin(operation_id, &content).await;
                ShareMessage::ClipboardData(ClipboardDataMessage {
                    operation_id,
                    payload: content.to_payload(),
                })
            }
            LocalEvent::DragExited {
                operation_id,
                content,
            } => {
                self.remember_origin(operation_id, &content).await;
                ShareMessage::DragDropData(DragDropDataMessage {
                    operation_id,
                    payload: content.to_payload(),
                })
            }
            LocalEvent::DropSuccess { operation_id } => ShareMessage::DragDropSuccess { operation_id },
            LocalEvent::DropCancelled { operation_id } => ShareMessage::DragDropCancelled { operation_id },
        };
        let connection = self
            .state
            .lock()
            .await
            .connection
            .clone()
            .ok_or(SessionError::NotConnected)?;
        connection.send(msg)?;
        Ok(())
    }

    async fn remember_origin(&self, operation_id: OperationId, content: &LocalContent) {
        let Some(group) = content.files() else {
            return;
        };
        let evicted = {
            let mut state = self.state.lock().await;
            state.origins.push_back(OriginOperation {
                id: operation_id,
                sources: group.sources().clone(),
                token: None,
            });
            if state.origins.len() > MAX_ORIGIN_OPERATIONS {
                state.origins.pop_front()
            } else {
                None
            }
        };
        if let Some(token) = evicted.and_then(|op| op.token) {
            self.files.delete_token(token).await;
        }
    }

    /// The file controller expired `token`.
    pub async fn token_closed(&self, token: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(op) = state.origins.iter_mut().find(|op| op.token == Some(token)) {
            debug!(operation = %op.id, "origin token expired");
            op.token = None;
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    pub async fn edge_states(&self) -> EdgeStatesMessage {
        self.state.lock().await.edge_states
    }

    pub async fn input_active(&self) -> bool {
        self.state.lock().await.input_active
    }

    /// Token issued for a local operation, if the server asked for one.
    pub async fn token_of(&self, operation_id: OperationId) -> Option<Uuid> {
        self.state
            .lock()
            .await
            .origins
            .iter()
            .find(|op| op.id == operation_id)
            .and_then(|op| op.token)
    }

    pub async fn origin_count(&self) -> usize {
        self.state.lock().await.origins.len()
    }
}

fn send_reply(connection: &Connection, request_id: Uuid, answer: ShareMessage) {
    if let Err(e) = connection.reply(request_id, answer) {
        debug!("reply not sent: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use netshare_core::desktop::mock::{DesktopCall, MockDesktop};
    use netshare_core::domain::payload::{ClipboardPayload, LocalFileGroup};
    use netshare_core::files::FileAccessConfig;
    use netshare_core::protocol::messages::{Edge, InputData};
    use netshare_core::transport::connection::{ConnectionConfig, MessageHandler};

    /// Server-side stub that records what the client sends.
    #[derive(Default)]
    struct Recorder {
        received: std::sync::Mutex<Vec<ShareMessage>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, _c: &Connection, envelope: Envelope) {
            self.received.lock().unwrap().push(envelope.message);
        }
        async fn on_closed(&self, _c: &Connection, _r: &ConnectionError) {}
    }

    impl Recorder {
        async fn wait_for(&self, count: usize) -> Vec<ShareMessage> {
            for _ in 0..200 {
                let received = self.received.lock().unwrap().clone();
                if received.len() >= count {
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("server stub never received {count} message(s)");
        }
    }

    struct Ignore;

    #[async_trait]
    impl MessageHandler for Ignore {
        async fn on_message(&self, _c: &Connection, _e: Envelope) {}
        async fn on_closed(&self, _c: &Connection, _r: &ConnectionError) {}
    }

    struct Fixture {
        session: ClientSession,
        desktop: Arc<MockDesktop>,
        client_side: Connection,
        _server_side: Connection,
        recorder: Arc<Recorder>,
        _dir: tempfile::TempDir,
        files: LocalFileGroup,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.txt");
        std::fs::write(&path, b"quarterly numbers").unwrap();
        let files = LocalFileGroup::scan(&[path]).expect("scan");

        let (controller, _closed) = FileAccessController::new(FileAccessConfig::default());
        let desktop = Arc::new(MockDesktop::new());
        let session = ClientSession::new(desktop.clone(), Arc::new(controller), None);

        let (a, b) = tokio::io::duplex(64 * 1024);
        let recorder = Arc::new(Recorder::default());
        let client_side = Connection::spawn(a, "client", ConnectionConfig::default(), Arc::new(Ignore));
        let server_side = Connection::spawn(b, "server", ConnectionConfig::default(), recorder.clone());
        session.attach(client_side.clone()).await;
        Fixture {
            session,
            desktop,
            client_side,
            _server_side: server_side,
            recorder,
            _dir: dir,
            files,
        }
    }

    async fn drag_files(f: &Fixture) -> OperationId {
        let op = Uuid::new_v4();
        f.session
            .handle_local_event(LocalEvent::DragExited {
                operation_id: op,
                content: LocalContent::Files(f.files.clone()),
            })
            .await
            .unwrap();
        op
    }

    fn request(message: ShareMessage) -> Envelope {
        Envelope::new(message)
    }

    #[tokio::test]
    async fn test_local_drag_is_announced_and_remembered() {
        // Arrange
        let f = fixture().await;

        // Act
        let op = drag_files(&f).await;

        // Assert
        assert_eq!(f.session.origin_count().await, 1);
        let received = f.recorder.wait_for(1).await;
        assert!(matches!(
            &received[0],
            ShareMessage::DragDropData(msg) if msg.operation_id == op && msg.payload.is_files()
        ));
    }

    #[tokio::test]
    async fn test_token_request_for_known_operation_issues_one_token() {
        // Arrange
        let f = fixture().await;
        let op = drag_files(&f).await;

        // Act
        let first = f.session.issue_token(op).await;
        let second = f.session.issue_token(op).await;

        // Assert
        let ShareMessage::FileGroupTokenResponse { token } = first else {
            panic!("expected a token, got {first:?}");
        };
        assert_eq!(second, ShareMessage::FileGroupTokenResponse { token });
        assert!(f.session.files().has_token(token).await);
        assert_eq!(f.session.token_of(op).await, Some(token));
    }

    #[tokio::test]
    async fn test_token_request_for_unknown_operation_is_read_error() {
        let f = fixture().await;

        let answer = f.session.issue_token(Uuid::new_v4()).await;

        assert!(matches!(answer, ShareMessage::FileStreamReadError { .. }));
    }

    #[tokio::test]
    async fn test_read_request_is_served_from_local_files() {
        // Arrange
        let f = fixture().await;
        let op = drag_files(&f).await;
        let ShareMessage::FileGroupTokenResponse { token } = f.session.issue_token(op).await else {
            panic!("no token");
        };
        let file_id = *f.files.sources().keys().next().unwrap();

        // Act
        let answer = f
            .session
            .serve_read(FileStreamReadRequestMessage {
                token,
                file_id,
                read_len: 9,
            })
            .await;

        // Assert
        assert_eq!(answer, ShareMessage::FileStreamReadResponse { data: b"quarterly".to_vec() });
    }

    #[tokio::test]
    async fn test_completion_deletes_origin_token() {
        // Arrange
        let f = fixture().await;
        let op = drag_files(&f).await;
        let ShareMessage::FileGroupTokenResponse { token } = f.session.issue_token(op).await else {
            panic!("no token");
        };

        // Act
        f.session
            .handle_server_message(&f.client_side, request(ShareMessage::DragDropComplete { operation_id: op }))
            .await;

        // Assert
        assert!(!f.session.files().has_token(token).await);
        assert_eq!(f.session.origin_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_commands_reach_desktop() {
        // Arrange
        let f = fixture().await;
        let op = Uuid::new_v4();
        let input = InputData { code: 1, param1: 5, param2: -5 };

        // Act
        for msg in [
            ShareMessage::ClientActive,
            ShareMessage::InputData(input),
            ShareMessage::DragDropData(DragDropDataMessage {
                operation_id: op,
                payload: ClipboardPayload::Text("drag".into()),
            }),
            ShareMessage::CancelAnyDragDrop,
        ] {
            f.session.handle_server_message(&f.client_side, request(msg)).await;
        }

        // Assert
        assert_eq!(
            f.desktop.calls(),
            vec![
                DesktopCall::InputActive(true),
                DesktopCall::Input(input),
                DesktopCall::DragDrop {
                    operation_id: op,
                    payload: ClipboardPayload::Text("drag".into()),
                },
                DesktopCall::CancelDrop,
            ]
        );
        assert!(f.session.input_active().await);
        assert!(f.desktop.file_source(op).is_some());
    }

    #[tokio::test]
    async fn test_detach_deletes_tokens_and_refuses_events() {
        // Arrange
        let f = fixture().await;
        let op = drag_files(&f).await;
        let ShareMessage::FileGroupTokenResponse { token } = f.session.issue_token(op).await else {
            panic!("no token");
        };

        // Act
        f.session.detach().await;
        let result = f.session.handle_local_event(LocalEvent::EdgeHit(Edge::Left)).await;

        // Assert
        assert!(!f.session.files().has_token(token).await);
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_oldest_origin_is_forgotten_beyond_bound() {
        let f = fixture().await;
        let first = drag_files(&f).await;

        for _ in 0..MAX_ORIGIN_OPERATIONS {
            drag_files(&f).await;
        }

        assert_eq!(f.session.origin_count().await, MAX_ORIGIN_OPERATIONS);
        assert!(matches!(
            f.session.issue_token(first).await,
            ShareMessage::FileStreamReadError { .. }
        ));
    }
}
