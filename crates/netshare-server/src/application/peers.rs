//! Peer registry: connected clients, the screen layout, and input focus.
//!
//! # Peers (for beginners)
//!
//! Every machine taking part is a *peer*.  The server's own machine is the
//! [`Peer::Local`] peer; each connected client is a [`Peer::Remote`] carrying
//! the [`Connection`] used to talk to it.  Exactly one peer holds input
//! focus at a time.  Focus moves when the focused peer's cursor hits an edge
//! that the layout links to another connected peer:
//!
//! ```text
//!  [[layout]] desk --right--> laptop
//!
//!  focus = desk ── EdgeHit(Right) from desk ──► focus = laptop
//! ```
//!
//! An edge hit reported by a peer that does not hold focus is ignored.

use std::collections::HashMap;

use netshare_core::protocol::messages::{DisplayConfigMessage, Edge, EdgeStatesMessage};
use netshare_core::transport::connection::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Server-assigned identifier of a connected client.
pub type ClientId = Uuid;

/// Identity of a peer, without the means to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerId {
    Local,
    Client(ClientId),
}

/// A connected client.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub id: ClientId,
    pub name: String,
    pub connection: Connection,
}

/// A peer together with the means to reach it.
#[derive(Debug, Clone)]
pub enum Peer {
    Local,
    Remote(RemotePeer),
}

impl Peer {
    pub fn id(&self) -> PeerId {
        match self {
            Peer::Local => PeerId::Local,
            Peer::Remote(remote) => PeerId::Client(remote.id),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Peer::Local)
    }

    /// Name for log lines.
    pub fn label(&self) -> &str {
        match self {
            Peer::Local => "local",
            Peer::Remote(remote) => &remote.name,
        }
    }
}

/// Why a handshake was refused.  The text is sent to the client verbatim.
#[derive(Debug, Error, PartialEq)]
pub enum DeclineReason {
    #[error("a client named {0:?} is already connected")]
    NameInUse(String),
    #[error("{0:?} is the server's own name")]
    NameIsServer(String),
    #[error("protocol version {client} is not supported (server speaks {server})")]
    VersionMismatch { client: u32, server: u32 },
    #[error("the server already has the maximum of {0} clients")]
    ServerFull(usize),
}

/// Result of a focus move.
#[derive(Debug, Clone)]
pub struct FocusChange {
    pub old: Peer,
    pub new: Peer,
}

/// Directed edge links between peer names.  Names match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    links: HashMap<(String, Edge), String>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that leaving `from` through `edge` enters `to`.
    pub fn link(&mut self, from: impl Into<String>, edge: Edge, to: impl Into<String>) {
        self.links
            .insert((from.into().to_ascii_lowercase(), edge), to.into());
    }

    pub fn neighbour(&self, name: &str, edge: Edge) -> Option<&str> {
        self.links
            .get(&(name.to_ascii_lowercase(), edge))
            .map(String::as_str)
    }

    /// Which edges of `name` lead anywhere.
    pub fn edge_states(&self, name: &str) -> EdgeStatesMessage {
        let mut states = EdgeStatesMessage::default();
        for edge in Edge::ALL {
            if self.neighbour(name, edge).is_some() {
                states.set(edge);
            }
        }
        states
    }
}

#[derive(Debug)]
struct ClientEntry {
    peer: RemotePeer,
    display: DisplayConfigMessage,
}

#[derive(Debug)]
struct RegistryState {
    clients: HashMap<ClientId, ClientEntry>,
    focus: PeerId,
}

/// Connected clients plus the current focus.
#[derive(Debug)]
pub struct PeerRegistry {
    local_name: String,
    max_clients: usize,
    layout: Layout,
    state: Mutex<RegistryState>,
}

impl PeerRegistry {
    pub fn new(local_name: impl Into<String>, max_clients: usize, layout: Layout) -> Self {
        Self {
            local_name: local_name.into(),
            max_clients,
            layout,
            state: Mutex::new(RegistryState {
                clients: HashMap::new(),
                focus: PeerId::Local,
            }),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Adds a client after a successful handshake.
    ///
    /// # Errors
    ///
    /// Returns a [`DeclineReason`] when the handshake must be refused.
    pub async fn register(
        &self,
        name: &str,
        protocol_version: u32,
        display: DisplayConfigMessage,
        connection: Connection,
    ) -> Result<RemotePeer, DeclineReason> {
        let server_version = netshare_core::protocol::messages::PROTOCOL_VERSION;
        if protocol_version != server_version {
            return Err(DeclineReason::VersionMismatch {
                client: protocol_version,
                server: server_version,
            });
        }
        if name.eq_ignore_ascii_case(&self.local_name) {
            return Err(DeclineReason::NameIsServer(name.to_string()));
        }

        let mut state = self.state.lock().await;
        if state.clients.values().any(|c| c.peer.name.eq_ignore_ascii_case(name)) {
            return Err(DeclineReason::NameInUse(name.to_string()));
        }
        if state.clients.len() >= self.max_clients {
            return Err(DeclineReason::ServerFull(self.max_clients));
        }

        let peer = RemotePeer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            connection,
        };
        state.clients.insert(
            peer.id,
            ClientEntry {
                peer: peer.clone(),
                display,
            },
        );
        info!(client = %peer.name, id = %peer.id, "client registered");
        Ok(peer)
    }

    /// Removes a client.  If it held focus, focus falls back to the local
    /// peer and the change is returned.
    pub async fn unregister(&self, id: ClientId) -> Option<FocusChange> {
        let mut state = self.state.lock().await;
        let entry = state.clients.remove(&id)?;
        info!(client = %entry.peer.name, "client unregistered");
        if state.focus != PeerId::Client(id) {
            return None;
        }
        state.focus = PeerId::Local;
        Some(FocusChange {
            old: Peer::Remote(entry.peer),
            new: Peer::Local,
        })
    }

    pub async fn update_display(&self, id: ClientId, display: DisplayConfigMessage) {
        if let Some(entry) = self.state.lock().await.clients.get_mut(&id) {
            entry.display = display;
        }
    }

    pub async fn display_of(&self, id: ClientId) -> Option<DisplayConfigMessage> {
        self.state
            .lock()
            .await
            .clients
            .get(&id)
            .map(|entry| entry.display.clone())
    }

    pub async fn focus(&self) -> Peer {
        let state = self.state.lock().await;
        resolve(&state, state.focus).unwrap_or(Peer::Local)
    }

    pub async fn get(&self, id: PeerId) -> Option<Peer> {
        resolve(&*self.state.lock().await, id)
    }

    /// Every connected client.
    pub async fn remotes(&self) -> Vec<RemotePeer> {
        self.state
            .lock()
            .await
            .clients
            .values()
            .map(|entry| entry.peer.clone())
            .collect()
    }

    /// Moves focus across `edge` of `from`, if `from` holds focus and the
    /// layout links that edge to a reachable peer.
    pub async fn move_focus(&self, from: PeerId, edge: Edge) -> Option<FocusChange> {
        let mut state = self.state.lock().await;
        if state.focus != from {
            return None;
        }
        let old = resolve(&state, from)?;
        let from_name = match &old {
            Peer::Local => self.local_name.as_str(),
            Peer::Remote(remote) => remote.name.as_str(),
        };
        let target = self.layout.neighbour(from_name, edge)?;
        let new = if target.eq_ignore_ascii_case(&self.local_name) {
            Peer::Local
        } else {
            Peer::Remote(
                state
                    .clients
                    .values()
                    .find(|c| c.peer.name.eq_ignore_ascii_case(target))?
                    .peer
                    .clone(),
            )
        };
        if new.id() == old.id() {
            return None;
        }
        state.focus = new.id();
        info!(from = old.label(), to = new.label(), ?edge, "input focus moved");
        Some(FocusChange { old, new })
    }

    /// Edge states to announce to the client called `name`.
    pub fn edge_states(&self, name: &str) -> EdgeStatesMessage {
        self.layout.edge_states(name)
    }
}

fn resolve(state: &RegistryState, id: PeerId) -> Option<Peer> {
    match id {
        PeerId::Local => Some(Peer::Local),
        PeerId::Client(client) => state
            .clients
            .get(&client)
            .map(|entry| Peer::Remote(entry.peer.clone())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
