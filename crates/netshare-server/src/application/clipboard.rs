//! Clipboard broadcast controller.
//!
//! A copy on any peer becomes a clipboard operation that is pushed to every
//! other peer.  There is no state machine: the newest operation is current
//! until the next copy supersedes it.  Superseded file operations keep their
//! token in a bounded archive so a paste that already started can finish.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use netshare_core::desktop::LocalDesktop;
use netshare_core::domain::operation::OperationId;
use netshare_core::domain::payload::ClipboardPayload;
use netshare_core::protocol::messages::{ClipboardDataMessage, ShareMessage};
use netshare_core::transport::file_source::TransferError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peers::{Peer, PeerId, PeerRegistry};
use super::relay::FileRelay;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard operation {0} was already published")]
    DuplicateOperation(OperationId),

    #[error("no access token for the copied files: {0}")]
    TokenUnavailable(#[source] TransferError),
}

#[derive(Debug, Clone)]
pub struct ClipboardConfig {
    /// Idle timeout of tokens issued for local copies; `None` never expires.
    pub token_timeout: Option<Duration>,
    pub max_archived: usize,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            token_timeout: None,
            max_archived: 8,
        }
    }
}

#[derive(Debug, Clone)]
struct ClipboardOperation {
    id: OperationId,
    origin: PeerId,
    token: Option<Uuid>,
}

#[derive(Debug, Default)]
struct ClipboardState {
    current: Option<ClipboardOperation>,
    archive: VecDeque<ClipboardOperation>,
}

impl ClipboardState {
    fn contains(&self, operation_id: OperationId) -> bool {
        self.current.as_ref().is_some_and(|op| op.id == operation_id)
            || self.archive.iter().any(|op| op.id == operation_id)
    }
}

pub struct ClipboardController {
    peers: Arc<PeerRegistry>,
    relay: Arc<FileRelay>,
    desktop: Arc<dyn LocalDesktop>,
    config: ClipboardConfig,
    state: Mutex<ClipboardState>,
}

impl ClipboardController {
    pub fn new(
        peers: Arc<PeerRegistry>,
        relay: Arc<FileRelay>,
        desktop: Arc<dyn LocalDesktop>,
        config: ClipboardConfig,
    ) -> Self {
        Self {
            peers,
            relay,
            desktop,
            config,
            state: Mutex::new(ClipboardState::default()),
        }
    }

    /// Makes `payload` the clipboard of every peer except `origin`.
    ///
    /// # Errors
    ///
    /// Fails without broadcasting when the id was already seen or no token
    /// could be obtained for a file payload.
    pub async fn publish(
        &self,
        origin: &Peer,
        operation_id: OperationId,
        payload: ClipboardPayload,
        local_files: Option<&HashMap<Uuid, PathBuf>>,
    ) -> Result<(), ClipboardError> {
        if self.state.lock().await.contains(operation_id) {
            return Err(ClipboardError::DuplicateOperation(operation_id));
        }

        let (payload, token) = if payload.is_files() {
            let token = self
                .relay
                .obtain_token(origin, operation_id, local_files, self.config.token_timeout)
                .await
                .map_err(ClipboardError::TokenUnavailable)?;
            (payload.with_access_token(token), Some(token))
        } else {
            (payload, None)
        };

        let evicted = {
            let mut state = self.state.lock().await;
            let previous = state.current.replace(ClipboardOperation {
                id: operation_id,
                origin: origin.id(),
                token,
            });
            let mut evicted = Vec::new();
            if let Some(previous) = previous.filter(|op| op.token.is_some()) {
                state.archive.push_back(previous);
                while state.archive.len() > self.config.max_archived {
                    evicted.extend(state.archive.pop_front());
                }
            }
            evicted
        };
        for old in evicted {
            if let Some(token) = old.token {
                debug!(operation = %old.id, "clipboard archive full; releasing token");
                self.relay.release(token, old.id).await;
            }
        }

        info!(
            operation = %operation_id,
            origin = origin.label(),
            kind = payload.kind_name(),
            "clipboard changed"
        );
        for remote in self.peers.remotes().await {
            if PeerId::Client(remote.id) == origin.id() {
                continue;
            }
            let msg = ShareMessage::ClipboardData(ClipboardDataMessage {
                operation_id,
                payload: payload.clone(),
            });
            if let Err(e) = remote.connection.send(msg) {
                warn!(operation = %operation_id, "clipboard not sent to {}: {e}", remote.name);
            }
        }
        if !origin.is_local() {
            self.desktop
                .set_clipboard_data(operation_id, payload, self.relay.clone());
        }
        Ok(())
    }

    /// The file controller expired `token`.
    pub async fn on_token_closed(&self, token: Uuid) {
        let mut state = self.state.lock().await;
        state.archive.retain(|op| op.token != Some(token));
        if let Some(current) = state.current.as_mut() {
            if current.token == Some(token) {
                debug!(operation = %current.id, "current clipboard token expired");
                current.token = None;
            }
        }
    }

    /// Forgets every operation `peer` originated; its files are gone.
    pub async fn on_peer_disconnected(&self, peer: PeerId) {
        let mut state = self.state.lock().await;
        let mut gone = Vec::new();
        state.archive.retain(|op| {
            if op.origin == peer {
                gone.extend(op.token);
                false
            } else {
                true
            }
        });
        if state.current.as_ref().is_some_and(|op| op.origin == peer) {
            gone.extend(state.current.take().and_then(|op| op.token));
        }
        drop(state);
        for token in gone {
            self.relay.forget(token).await;
        }
    }

    pub async fn current(&self) -> Option<OperationId> {
        self.state.lock().await.current.as_ref().map(|op| op.id)
    }

    pub async fn archived(&self) -> Vec<OperationId> {
        self.state.lock().await.archive.iter().map(|op| op.id).collect()
    }

    pub async fn token_of(&self, operation_id: OperationId) -> Option<Uuid> {
        let state = self.state.lock().await;
        state
            .current
            .iter()
            .chain(state.archive.iter())
            .find(|op| op.id == operation_id)
            .and_then(|op| op.token)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
