//! The seam through which a receiving desktop pulls file bytes.
//!
//! Whoever drops or pastes a file group gets an `Arc<dyn FileSource>` along
//! with the payload.  The source hides where the bytes really live: a local
//! [`FileAccessController`](crate::files::FileAccessController), the server
//! relaying to the origin client, or a client asking the server.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::files::FileAccessError;
use crate::protocol::messages::{
    FileStreamCloseRequestMessage, FileStreamReadRequestMessage, MessageType, ShareMessage,
};
use crate::transport::connection::{Connection, ConnectionError};

/// Failure to obtain or read remote file data.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No live operation owns this access token.
    #[error("no operation holds access token {0}")]
    UnknownToken(Uuid),

    /// No live operation has this id.
    #[error("operation {0} is unknown")]
    UnknownOperation(Uuid),

    /// The origin's file controller refused the request.
    #[error(transparent)]
    Access(#[from] FileAccessError),

    /// The remote side answered with FILE_STREAM_READ_ERROR.
    #[error("remote read failed: {0}")]
    Remote(String),

    /// The request could not be delivered or its reply never came.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The remote side answered with a message that is not a valid reply.
    #[error("unexpected reply {0:?}")]
    UnexpectedReply(MessageType),
}

/// Pull-based access to the files of an operation.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Reads up to `len` bytes from the current cursor of `file_id`.  An
    /// empty result means end-of-file, and so does any short result when
    /// `len` is within the origin's per-read cap (1 MiB by default).
    async fn read(&self, token: Uuid, file_id: Uuid, len: u32) -> Result<Vec<u8>, TransferError>;

    /// Releases the cursor of `file_id`.  Best effort.
    async fn close_stream(&self, token: Uuid, file_id: Uuid);

    /// Reports that the receiver has copied everything it wanted.
    async fn complete(&self, operation_id: Uuid);
}

// ── Request helpers ───────────────────────────────────────────────────────────

/// Asks the peer behind `connection` for a read of one file.
pub async fn request_read(
    connection: &Connection,
    token: Uuid,
    file_id: Uuid,
    len: u32,
) -> Result<Vec<u8>, TransferError> {
    let reply = connection
        .call(ShareMessage::FileStreamReadRequest(FileStreamReadRequestMessage {
            token,
            file_id,
            read_len: len,
        }))
        .await?;
    match reply.message {
        ShareMessage::FileStreamReadResponse { data } => Ok(data),
        ShareMessage::FileStreamReadError { reason } => Err(TransferError::Remote(reason)),
        other => Err(TransferError::UnexpectedReply(other.message_type())),
    }
}

/// Asks the peer behind `connection` to issue an access token for the files
/// of `operation_id`.
pub async fn request_token(connection: &Connection, operation_id: Uuid) -> Result<Uuid, TransferError> {
    let reply = connection
        .call(ShareMessage::RequestFileGroupToken { operation_id })
        .await?;
    match reply.message {
        ShareMessage::FileGroupTokenResponse { token } => Ok(token),
        ShareMessage::FileStreamReadError { reason } => Err(TransferError::Remote(reason)),
        other => Err(TransferError::UnexpectedReply(other.message_type())),
    }
}

/// Tells the peer behind `connection` to drop one file cursor.
pub fn send_close_stream(connection: &Connection, token: Uuid, file_id: Uuid) {
    let msg = ShareMessage::FileStreamCloseRequest(FileStreamCloseRequestMessage { token, file_id });
    if let Err(e) = connection.send(msg) {
        debug!(%token, %file_id, "close-stream request not sent: {e}");
    }
}

/// Serves a read request from `source` and builds the wire answer.
///
/// Every failure becomes FILE_STREAM_READ_ERROR so it never escapes the
/// connection that asked.
pub async fn answer_read_request(
    source: &dyn FileSource,
    request: FileStreamReadRequestMessage,
) -> ShareMessage {
    match source.read(request.token, request.file_id, request.read_len).await {
        Ok(data) => ShareMessage::FileStreamReadResponse { data },
        Err(e) => {
            debug!(token = %request.token, file_id = %request.file_id, "read failed: {e}");
            ShareMessage::FileStreamReadError {
                reason: e.to_string(),
            }
        }
    }
}

// ── RemoteFileSource ──────────────────────────────────────────────────────────

/// [`FileSource`] that forwards everything over one connection.
///
/// Used by clients: all of their remote reads go through the server.
#[derive(Debug, Clone)]
pub struct RemoteFileSource {
    connection: Connection,
}

impl RemoteFileSource {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl FileSource for RemoteFileSource {
    async fn read(&self, token: Uuid, file_id: Uuid, len: u32) -> Result<Vec<u8>, TransferError> {
        request_read(&self.connection, token, file_id, len).await
    }

    async fn close_stream(&self, token: Uuid, file_id: Uuid) {
        send_close_stream(&self.connection, token, file_id);
    }

    async fn complete(&self, operation_id: Uuid) {
        if let Err(e) = self
            .connection
            .send(ShareMessage::DragDropComplete { operation_id })
        {
            debug!(%operation_id, "completion not sent: {e}");
        }
    }
}
