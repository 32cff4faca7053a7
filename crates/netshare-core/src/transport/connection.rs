//! Connection engine: one framed, bidirectional message channel per peer.
//!
//! # How a connection works (for beginners)
//!
//! A [`Connection`] wraps any byte stream (a `TcpStream` in production, an
//! in-memory pipe in tests) and spawns two tasks on it:
//!
//! ```text
//!            ┌──────────── reader task ────────────┐
//!  socket ──►│ read 4-byte length, then the frame  │
//!            │ MESSAGE_PART? ──► Reassembler       │
//!            │ duplicate id? ──► drop              │
//!            │ pending call? ──► wake the caller   │
//!            │ otherwise     ──► MessageHandler    │
//!            └─────────────────────────────────────┘
//!            ┌──────────── writer task ────────────┐
//!  send() ──►│ mpsc queue of encoded frames ──► socket
//!            └─────────────────────────────────────┘
//! ```
//!
//! [`Connection::send`] never touches the socket: it encodes (and if needed
//! chunks) the message, then pushes the frames onto the writer's queue.
//! [`Connection::call`] sends a request and awaits the reply that carries the
//! same message id, racing it against a timeout.
//!
//! The reader awaits [`MessageHandler::on_message`] before reading the next
//! frame.  A handler that needs to `call` the same peer must therefore spawn
//! a task for it; awaiting the reply inline would stall the only task able
//! to receive that reply.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::protocol::chunk::{
    encode_frames, Reassembler, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_MAX_PENDING_TRANSFERS,
};
use crate::protocol::codec::{decode_frame, read_frame_length, ProtocolError};
use crate::protocol::messages::{
    Envelope, MessageId, MessageType, ShareMessage, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
    LENGTH_PREFIX_SIZE,
};

/// Default time a [`Connection::call`] waits for its reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default socket receive buffer: one full chunk plus headroom.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 260 * 1024;

/// Number of recently handled message ids remembered for duplicate suppression.
const SEEN_ID_CAPACITY: usize = 4096;

/// Errors reported by a [`Connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer sent bytes that violate the wire protocol.  Fatal.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The underlying stream failed.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closed; the string says why.
    #[error("connection closed: {0}")]
    Closed(String),

    /// No reply arrived before the call timeout elapsed.
    #[error("no reply to {message_type:?} within {timeout:?}")]
    RequestTimedOut {
        message_type: MessageType,
        timeout: Duration,
    },
}

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Encoded size above which outgoing messages are chunked.
    pub chunk_threshold: usize,
    /// Largest frame accepted from the peer; anything bigger is fatal.
    pub max_frame_size: usize,
    /// Largest total a chunked transfer from the peer may announce.
    pub max_message_size: usize,
    /// Chunked transfers from the peer that may be open at once.
    pub max_pending_transfers: usize,
    /// How long [`Connection::call`] waits for a reply.
    pub call_timeout: Duration,
    /// Receive buffer applied to TCP sockets; `None` keeps the OS default.
    pub recv_buffer_size: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_pending_transfers: DEFAULT_MAX_PENDING_TRANSFERS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            recv_buffer_size: Some(DEFAULT_RECV_BUFFER_SIZE),
        }
    }
}

/// Receives everything the reader task does not route to a pending call.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Called once per fully reassembled, non-duplicate message.
    async fn on_message(&self, connection: &Connection, envelope: Envelope);

    /// Called exactly once when the connection closes, for any reason.
    async fn on_closed(&self, connection: &Connection, reason: &ConnectionError);
}

type Waiter = oneshot::Sender<Result<Envelope, ConnectionError>>;

/// Bounded set of message ids already handled.
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `id`; returns `false` if it was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

struct Inner {
    name: String,
    config: ConnectionConfig,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<HashMap<MessageId, Waiter>>,
    seen: Mutex<SeenIds>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    /// Transitions to closed.  Only the first call has any effect.
    fn shutdown(&self, reason: String) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection = %self.name, %reason, "closing connection");
        *lock(&self.close_reason) = Some(reason.clone());

        let waiters: Vec<Waiter> = lock(&self.pending).drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(ConnectionError::Closed(reason.clone())));
        }
        self.shutdown.send_replace(true);
    }

    fn close_reason(&self) -> String {
        lock(&self.close_reason)
            .clone()
            .unwrap_or_else(|| "not closed".to_string())
    }

    fn take_waiter(&self, id: MessageId) -> Option<Waiter> {
        lock(&self.pending).remove(&id)
    }
}

/// Handle to one peer connection.  Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Starts the reader and writer tasks over `stream`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(
        stream: S,
        name: impl Into<String>,
        config: ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = Connection {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                outbound: outbound_tx,
                pending: Mutex::new(HashMap::new()),
                seen: Mutex::new(SeenIds::new(SEEN_ID_CAPACITY)),
                closed: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                shutdown: shutdown_tx,
            }),
        };

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(write_loop(
            Arc::clone(&connection.inner),
            writer,
            outbound_rx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(read_loop(connection.clone(), reader, handler, shutdown_rx));
        connection
    }

    /// Wraps an accepted or connected TCP stream, applying socket options
    /// from `config` first.
    pub fn from_tcp(
        stream: TcpStream,
        config: ConnectionConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Connection {
        let name = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown-peer".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            warn!(connection = %name, "could not disable Nagle: {e}");
        }
        if let Some(size) = config.recv_buffer_size {
            if let Err(e) = socket2::SockRef::from(&stream).set_recv_buffer_size(size) {
                warn!(connection = %name, "could not set receive buffer to {size} bytes: {e}");
            }
        }
        Self::spawn(stream, name, config, handler)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Sends `message` under a fresh id and returns that id.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or the message cannot be encoded.
    pub fn send(&self, message: ShareMessage) -> Result<MessageId, ConnectionError> {
        let envelope = Envelope::new(message);
        self.send_envelope(&envelope)?;
        Ok(envelope.id)
    }

    /// Sends `message` as the answer to the request with id `request_id`.
    pub fn reply(&self, request_id: MessageId, message: ShareMessage) -> Result<(), ConnectionError> {
        self.send_envelope(&Envelope::reply(request_id, message))
    }

    /// Encodes `envelope`, chunking it if it exceeds the threshold, and
    /// queues the frames for the writer task.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.inner.close_reason()));
        }
        let frames = encode_frames(envelope, self.inner.config.chunk_threshold)?;
        if frames.len() > 1 {
            trace!(
                connection = %self.inner.name,
                id = %envelope.id,
                parts = frames.len(),
                "sending {:?} as chunks",
                envelope.message_type()
            );
        }
        for frame in frames {
            self.inner
                .outbound
                .send(frame)
                .map_err(|_| ConnectionError::Closed("writer task stopped".to_string()))?;
        }
        Ok(())
    }

    /// Sends `message` and waits for the reply carrying the same id.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::RequestTimedOut`] when no reply arrives in
    /// time, or [`ConnectionError::Closed`] if the connection closes first.
    pub async fn call(&self, message: ShareMessage) -> Result<Envelope, ConnectionError> {
        let envelope = Envelope::new(message);
        let message_type = envelope.message_type();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(envelope.id, tx);

        if let Err(e) = self.send_envelope(&envelope) {
            self.inner.take_waiter(envelope.id);
            return Err(e);
        }

        let timeout = self.inner.config.call_timeout;
        match time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Closed(self.inner.close_reason())),
            Err(_) => {
                self.inner.take_waiter(envelope.id);
                debug!(connection = %self.inner.name, id = %envelope.id, "call timed out");
                Err(ConnectionError::RequestTimedOut {
                    message_type,
                    timeout,
                })
            }
        }
    }

    /// Closes the connection.  Pending calls fail immediately; frames
    /// already queued are still flushed.  Calling this more than once is
    /// harmless.
    pub fn close(&self) {
        self.inner.shutdown("closed locally".to_string());
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    async fn dispatch_frame(
        &self,
        frame: &[u8],
        reassembler: &mut Reassembler,
        handler: &dyn MessageHandler,
    ) -> Result<(), ConnectionError> {
        let Envelope { id, message } = decode_frame(frame)?;
        let envelope = match message {
            ShareMessage::MessagePart(part) => match reassembler.push(id, part)? {
                Some(bytes) => decode_frame(&bytes)?,
                None => return Ok(()),
            },
            message => Envelope { id, message },
        };

        if !lock(&self.inner.seen).insert(envelope.id) {
            debug!(
                connection = %self.inner.name,
                id = %envelope.id,
                "dropping duplicate {:?}",
                envelope.message_type()
            );
            return Ok(());
        }

        if let Some(waiter) = self.inner.take_waiter(envelope.id) {
            if envelope.message_type().is_reply() {
                let _ = waiter.send(Ok(envelope));
                return Ok(());
            }
            let _ = waiter.send(Ok(envelope.clone()));
        }

        handler.on_message(self, envelope).await;
        Ok(())
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Vec<u8>>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let total = read_frame_length(&prefix);
    if !(FRAME_HEADER_SIZE..=max_frame_size).contains(&total) {
        return Err(ProtocolError::InvalidFrameLength {
            length: total,
            min: FRAME_HEADER_SIZE,
            max: max_frame_size,
        }
        .into());
    }

    let mut frame = vec![0u8; total];
    frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[LENGTH_PREFIX_SIZE..]).await?;
    Ok(Some(frame))
}

async fn read_loop<R>(
    connection: Connection,
    mut reader: R,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let config = &connection.inner.config;
    let max_frame_size = config.max_frame_size;
    let mut reassembler =
        Reassembler::with_limits(config.max_message_size, config.max_pending_transfers);

    let reason = loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => {
                break ConnectionError::Closed(connection.inner.close_reason());
            }
            frame = read_frame(&mut reader, max_frame_size) => frame,
        };
        match frame {
            Ok(Some(frame)) => {
                if let Err(e) = connection
                    .dispatch_frame(&frame, &mut reassembler, handler.as_ref())
                    .await
                {
                    warn!(connection = %connection.inner.name, "{e}; closing");
                    break e;
                }
            }
            Ok(None) => break ConnectionError::Closed("remote closed the connection".to_string()),
            Err(e) => {
                warn!(connection = %connection.inner.name, "{e}; closing");
                break e;
            }
        }
    };

    connection.inner.shutdown(reason.to_string());
    info!(connection = %connection.inner.name, "connection closed: {reason}");
    handler.on_closed(&connection, &reason).await;
}

async fn write_loop<W>(
    inner: Arc<Inner>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // Queued frames win over shutdown so a final message sent just
        // before close() still reaches the peer.
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(connection = %inner.name, "write failed: {e}");
            inner.shutdown(format!("write failed: {e}"));
            break;
        }
    }
    let _ = writer.shutdown().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
