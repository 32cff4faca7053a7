//! Routes client messages and local desktop events to the right controller.
//!
//! The broker owns no state of its own; it only decides, per message, which
//! of the registry, the drag-drop coordinator, the clipboard controller and
//! the file relay should act.  Anything that makes a blocking call to a peer
//! runs on its own task so the calling connection's reader keeps draining
//! replies.

use std::sync::Arc;

use netshare_core::desktop::{LocalDesktop, LocalEvent};
use netshare_core::files::FileAccessController;
use netshare_core::protocol::messages::{
    ClientDeclinedMessage, Edge, Envelope, InitialInfoMessage, ShareMessage,
};
use netshare_core::transport::connection::Connection;
use netshare_core::transport::file_source::{answer_read_request, FileSource};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clipboard::{ClipboardConfig, ClipboardController};
use super::dragdrop::{DragDropConfig, DragDropCoordinator};
use super::peers::{DeclineReason, FocusChange, Layout, Peer, PeerId, PeerRegistry, RemotePeer};
use super::relay::FileRelay;

/// Everything needed to assemble a [`Broker`] besides its collaborators.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// The server machine's name in the layout.
    pub name: String,
    pub max_clients: usize,
    pub layout: Layout,
    pub dragdrop: DragDropConfig,
    pub clipboard: ClipboardConfig,
}

pub struct Broker {
    peers: Arc<PeerRegistry>,
    relay: Arc<FileRelay>,
    dragdrop: Arc<DragDropCoordinator>,
    clipboard: Arc<ClipboardController>,
    desktop: Arc<dyn LocalDesktop>,
}

impl Broker {
    pub fn new(
        peers: Arc<PeerRegistry>,
        relay: Arc<FileRelay>,
        dragdrop: Arc<DragDropCoordinator>,
        clipboard: Arc<ClipboardController>,
        desktop: Arc<dyn LocalDesktop>,
    ) -> Self {
        Self {
            peers,
            relay,
            dragdrop,
            clipboard,
            desktop,
        }
    }

    /// Builds the registry, relay and both controllers around `files` and
    /// `desktop`.
    pub fn assemble(
        settings: BrokerSettings,
        files: Arc<FileAccessController>,
        desktop: Arc<dyn LocalDesktop>,
    ) -> Arc<Self> {
        let peers = Arc::new(PeerRegistry::new(settings.name, settings.max_clients, settings.layout));
        let relay = Arc::new(FileRelay::new(files));
        let dragdrop = DragDropCoordinator::new(
            Arc::clone(&peers),
            Arc::clone(&relay),
            Arc::clone(&desktop),
            settings.dragdrop,
        );
        let clipboard = Arc::new(ClipboardController::new(
            Arc::clone(&peers),
            Arc::clone(&relay),
            Arc::clone(&desktop),
            settings.clipboard,
        ));
        Arc::new(Self::new(peers, relay, dragdrop, clipboard, desktop))
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    pub fn dragdrop(&self) -> &Arc<DragDropCoordinator> {
        &self.dragdrop
    }

    pub fn clipboard(&self) -> &Arc<ClipboardController> {
        &self.clipboard
    }

    // ── Handshake ─────────────────────────────────────────────────────────

    /// Accepts or declines a client's INITIAL_INFO.
    ///
    /// On success the client receives SERVER_OK followed by its edge states.
    /// On refusal it receives CLIENT_DECLINED; closing is left to the caller.
    pub async fn register_client(
        &self,
        connection: &Connection,
        info: InitialInfoMessage,
    ) -> Result<RemotePeer, DeclineReason> {
        let registered = self
            .peers
            .register(&info.client_name, info.protocol_version, info.display, connection.clone())
            .await;
        let peer = match registered {
            Ok(peer) => peer,
            Err(reason) => {
                warn!(client = %info.client_name, "declining client: {reason}");
                let msg = ShareMessage::ClientDeclined(ClientDeclinedMessage {
                    reason: reason.to_string(),
                });
                if let Err(e) = connection.send(msg) {
                    debug!("decline not sent: {e}");
                }
                return Err(reason);
            }
        };

        let states = self.peers.edge_states(&peer.name);
        for msg in [ShareMessage::ServerOk, ShareMessage::ClientEdgeStates(states)] {
            if let Err(e) = connection.send(msg) {
                warn!(client = %peer.name, "handshake reply not sent: {e}");
            }
        }
        Ok(peer)
    }

    // ── Client messages ───────────────────────────────────────────────────

    /// Handles one message from a registered client.
    pub async fn handle_client_message(self: &Arc<Self>, peer: &RemotePeer, envelope: Envelope) {
        let reporter = PeerId::Client(peer.id);
        match envelope.message {
            ShareMessage::DragDropData(msg) => {
                let broker = Arc::clone(self);
                let origin = Peer::Remote(peer.clone());
                tokio::spawn(async move {
                    if let Err(e) = broker
                        .dragdrop
                        .begin(origin, msg.operation_id, msg.payload, None)
                        .await
                    {
                        warn!(operation = %msg.operation_id, "drag-drop not started: {e}");
                    }
                });
            }
            ShareMessage::ClipboardData(msg) => {
                let broker = Arc::clone(self);
                let origin = Peer::Remote(peer.clone());
                tokio::spawn(async move {
                    if let Err(e) = broker
                        .clipboard
                        .publish(&origin, msg.operation_id, msg.payload, None)
                        .await
                    {
                        warn!(operation = %msg.operation_id, "clipboard not published: {e}");
                    }
                });
            }
            ShareMessage::FileStreamReadRequest(request) => {
                let relay = Arc::clone(&self.relay);
                let connection = peer.connection.clone();
                let request_id = envelope.id;
                tokio::spawn(async move {
                    let answer = answer_read_request(relay.as_ref(), request).await;
                    if let Err(e) = connection.reply(request_id, answer) {
                        debug!("read answer not sent: {e}");
                    }
                });
            }
            ShareMessage::FileStreamCloseRequest(request) => {
                self.relay.close_stream(request.token, request.file_id).await;
            }
            ShareMessage::DragDropSuccess { operation_id } => {
                if let Err(e) = self.dragdrop.success(reporter, operation_id).await {
                    warn!(client = %peer.name, "drop ignored: {e}");
                }
            }
            ShareMessage::DragDropCancelled { operation_id } => {
                if let Err(e) = self.dragdrop.cancel(reporter, operation_id).await {
                    warn!(client = %peer.name, "cancel ignored: {e}");
                }
            }
            ShareMessage::DragDropComplete { operation_id } => {
                if let Err(e) = self.dragdrop.complete(reporter, operation_id).await {
                    warn!(client = %peer.name, "completion ignored: {e}");
                }
            }
            ShareMessage::EdgeHit(edge) => self.switch_focus(reporter, edge).await,
            ShareMessage::DisplayConfig(display) => {
                let monitors = display.displays.len();
                debug!(client = %peer.name, monitors, "display config updated");
                self.peers.update_display(peer.id, display).await;
            }
            other => {
                debug!(client = %peer.name, message = ?other.message_type(), "unexpected message ignored");
            }
        }
    }

    // ── Local desktop events ──────────────────────────────────────────────

    pub async fn handle_local_event(&self, event: LocalEvent) {
        match event {
            LocalEvent::EdgeHit(edge) => self.switch_focus(PeerId::Local, edge).await,
            LocalEvent::Input(input) => {
                if let Peer::Remote(remote) = self.peers.focus().await {
                    if let Err(e) = remote.connection.send(ShareMessage::InputData(input)) {
                        debug!("input not forwarded to {}: {e}", remote.name);
                    }
                }
            }
            LocalEvent::ClipboardChanged {
                operation_id,
                content,
            } => {
                let sources = content.files().map(|group| group.sources());
                if let Err(e) = self
                    .clipboard
                    .publish(&Peer::Local, operation_id, content.to_payload(), sources)
                    .await
                {
                    warn!(operation = %operation_id, "local copy not published: {e}");
                }
            }
            LocalEvent::DragExited {
                operation_id,
                content,
            } => {
                let sources = content.files().map(|group| group.sources());
                if let Err(e) = self
                    .dragdrop
                    .begin(Peer::Local, operation_id, content.to_payload(), sources)
                    .await
                {
                    warn!(operation = %operation_id, "local drag not started: {e}");
                }
            }
            LocalEvent::DropSuccess { operation_id } => {
                if let Err(e) = self.dragdrop.success(PeerId::Local, operation_id).await {
                    warn!("local drop ignored: {e}");
                }
            }
            LocalEvent::DropCancelled { operation_id } => {
                if let Err(e) = self.dragdrop.cancel(PeerId::Local, operation_id).await {
                    warn!("local cancel ignored: {e}");
                }
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Cleans up after a client's connection closed.
    pub async fn client_disconnected(&self, peer: &RemotePeer) {
        let id = PeerId::Client(peer.id);
        if let Some(change) = self.peers.unregister(peer.id).await {
            info!(client = %peer.name, "focused client left; input returns to this machine");
            self.apply_focus_change(change).await;
        }
        self.dragdrop.on_peer_disconnected(id).await;
        self.clipboard.on_peer_disconnected(id).await;
        self.relay.forget_origin(id).await;
    }

    /// The file controller expired one of the server's own tokens.
    pub async fn token_closed(&self, token: Uuid) {
        debug!(%token, "access token expired");
        self.relay.forget(token).await;
        self.dragdrop.on_token_closed(token).await;
        self.clipboard.on_token_closed(token).await;
    }

    async fn switch_focus(&self, from: PeerId, edge: Edge) {
        match self.peers.move_focus(from, edge).await {
            Some(change) => self.apply_focus_change(change).await,
            None => debug!(?from, ?edge, "edge hit does not move focus"),
        }
    }

    async fn apply_focus_change(&self, change: FocusChange) {
        if let Peer::Remote(old) = &change.old {
            if let Err(e) = old.connection.send(ShareMessage::ClientInactive) {
                debug!("inactive notice not sent to {}: {e}", old.name);
            }
        }
        if let Peer::Remote(new) = &change.new {
            if let Err(e) = new.connection.send(ShareMessage::ClientActive) {
                warn!("active notice not sent to {}: {e}", new.name);
            }
        }
        self.desktop.set_input_active(change.new.is_local());
        self.dragdrop.handle_client_switch(&change.old, &change.new).await;
    }
}
