//! File relay: routes token requests and stream reads to the peer that owns
//! the files.
//!
//! The server never copies file contents anywhere.  When a receiver reads a
//! file, the relay looks up which peer issued the token and either serves the
//! read from the local [`FileAccessController`] or forwards it as a blocking
//! call to the origin client:
//!
//! ```text
//!  receiver ──READ_REQUEST──► server relay ──READ_REQUEST──► origin client
//!           ◄─READ_RESPONSE──              ◄─READ_RESPONSE──
//! ```
//!
//! Tokens are only known here while an operation (current or archived) holds
//! them, so a read against a released token fails with `UnknownToken`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netshare_core::domain::operation::OperationId;
use netshare_core::files::FileAccessController;
use netshare_core::protocol::messages::ShareMessage;
use netshare_core::transport::file_source::{
    request_read, request_token, send_close_stream, FileSource, TransferError,
};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::peers::{Peer, PeerId};

/// Token directory plus the local file controller.
pub struct FileRelay {
    files: Arc<FileAccessController>,
    tokens: Mutex<HashMap<Uuid, Peer>>,
}

impl FileRelay {
    pub fn new(files: Arc<FileAccessController>) -> Self {
        Self {
            files,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn files(&self) -> &Arc<FileAccessController> {
        &self.files
    }

    /// Obtains an access token for the files of `operation_id` from its
    /// origin and records who issued it.
    ///
    /// A local origin must supply `local_sources`; a remote origin is asked
    /// with a blocking RequestFileGroupToken call.
    ///
    /// # Errors
    ///
    /// Fails when the origin refuses, times out, or has gone away.
    pub async fn obtain_token(
        &self,
        origin: &Peer,
        operation_id: OperationId,
        local_sources: Option<&HashMap<Uuid, PathBuf>>,
        idle_timeout: Option<Duration>,
    ) -> Result<Uuid, TransferError> {
        let token = match origin {
            Peer::Local => {
                let sources = local_sources.ok_or(TransferError::UnknownOperation(operation_id))?;
                self.files.create_token(sources.clone(), idle_timeout).await
            }
            Peer::Remote(remote) => request_token(&remote.connection, operation_id).await?,
        };
        debug!(%token, %operation_id, origin = origin.label(), "access token obtained");
        self.tokens.lock().await.insert(token, origin.clone());
        Ok(token)
    }

    /// Tells the origin it may drop `token`, and forgets it here.
    pub async fn release(&self, token: Uuid, operation_id: OperationId) {
        let Some(origin) = self.tokens.lock().await.remove(&token) else {
            return;
        };
        debug!(%token, %operation_id, origin = origin.label(), "releasing access token");
        match origin {
            Peer::Local => {
                self.files.delete_token(token).await;
            }
            Peer::Remote(remote) => {
                if let Err(e) = remote
                    .connection
                    .send(ShareMessage::DragDropComplete { operation_id })
                {
                    debug!(%operation_id, "completion not sent to {}: {e}", remote.name);
                }
            }
        }
    }

    /// Forgets `token` without telling anyone; used when the origin already
    /// dropped it or is gone.
    pub async fn forget(&self, token: Uuid) -> bool {
        self.tokens.lock().await.remove(&token).is_some()
    }

    /// Forgets every token issued by `peer`.
    pub async fn forget_origin(&self, peer: PeerId) {
        self.tokens.lock().await.retain(|_, origin| origin.id() != peer);
    }

    pub async fn origin_of(&self, token: Uuid) -> Option<Peer> {
        self.tokens.lock().await.get(&token).cloned()
    }
}

#[async_trait]
impl FileSource for FileRelay {
    async fn read(&self, token: Uuid, file_id: Uuid, len: u32) -> Result<Vec<u8>, TransferError> {
        match self.origin_of(token).await {
            None => Err(TransferError::UnknownToken(token)),
            Some(Peer::Local) => Ok(self.files.read(token, file_id, len as usize).await?),
            Some(Peer::Remote(remote)) => request_read(&remote.connection, token, file_id, len).await,
        }
    }

    async fn close_stream(&self, token: Uuid, file_id: Uuid) {
        match self.origin_of(token).await {
            None => {}
            Some(Peer::Local) => {
                if let Err(e) = self.files.close_stream(token, file_id).await {
                    debug!(%token, %file_id, "close-stream ignored: {e}");
                }
            }
            Some(Peer::Remote(remote)) => send_close_stream(&remote.connection, token, file_id),
        }
    }

    /// Clipboard pastes have no completion step; the token lives until the
    /// clipboard operation is superseded and evicted.
    async fn complete(&self, operation_id: Uuid) {
        debug!(%operation_id, "paste finished");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
