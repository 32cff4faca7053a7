//! Network infrastructure for the client application.
//!
//! Connects to the server, performs the INITIAL_INFO handshake, and hands
//! every later message to the [`ClientSession`].  When the connection drops
//! the session is detached and the loop reconnects after a fixed interval.
//!
//! ```text
//! connect ──► INITIAL_INFO ──► SERVER_OK ──► attach session ──► closed ──► detach
//!    ▲                    └──► CLIENT_DECLINED / timeout                    │
//!    └──────────────────────── sleep(reconnect_interval) ◄──────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use netshare_core::protocol::messages::{
    DisplayConfigMessage, Envelope, InitialInfoMessage, ShareMessage, PROTOCOL_VERSION,
};
use netshare_core::transport::connection::{
    Connection, ConnectionConfig, ConnectionError, MessageHandler,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::application::session::ClientSession;

/// Errors that can occur while connecting to the server.
#[derive(Debug, Error)]
pub enum ClientNetworkError {
    #[error("failed to connect to server at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server declined the connection: {0}")]
    Declined(String),

    #[error("server did not answer the handshake within {0:?}")]
    HandshakeTimedOut(Duration),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Configuration for the client's network connection.
#[derive(Debug, Clone)]
pub struct ClientConnectionConfig {
    /// `host:port` of the server.
    pub server_addr: String,
    /// Name announced to the server; must match the server's layout.
    pub client_name: String,
    pub display: DisplayConfigMessage,
    pub reconnect_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for ClientConnectionConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4441".to_string(),
            client_name: "netshare-client".to_string(),
            display: DisplayConfigMessage::default(),
            reconnect_interval: Duration::from_secs(5),
            connection: ConnectionConfig::default(),
        }
    }
}

type HandshakeResult = Result<(), String>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-connection handler: resolves the handshake, then forwards to the
/// session.
struct SessionHandler {
    session: Arc<ClientSession>,
    handshake: Mutex<Option<oneshot::Sender<HandshakeResult>>>,
}

impl SessionHandler {
    fn finish_handshake(&self, result: HandshakeResult) -> bool {
        match lock(&self.handshake).take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MessageHandler for SessionHandler {
    async fn on_message(&self, connection: &Connection, envelope: Envelope) {
        match envelope.message {
            ShareMessage::ServerOk if self.finish_handshake(Ok(())) => {}
            ShareMessage::ClientDeclined(msg) => {
                if !self.finish_handshake(Err(msg.reason.clone())) {
                    warn!("server declined us mid-session: {}", msg.reason);
                }
            }
            _ => self.session.handle_server_message(connection, envelope).await,
        }
    }

    async fn on_closed(&self, _connection: &Connection, reason: &ConnectionError) {
        // Dropping a pending sender fails the handshake.
        if lock(&self.handshake).take().is_none() {
            debug!("connection to server closed: {reason}");
        }
    }
}

/// Manages the connection from the client to the server.
pub struct ClientConnection {
    config: ClientConnectionConfig,
    session: Arc<ClientSession>,
}

impl ClientConnection {
    pub fn new(config: ClientConnectionConfig, session: Arc<ClientSession>) -> Self {
        Self { config, session }
    }

    /// Connects once, completes the handshake, and attaches the session.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be opened, the server declines, or no
    /// answer arrives within the call timeout.
    pub async fn connect(&self) -> Result<Connection, ClientNetworkError> {
        let addr = &self.config.server_addr;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientNetworkError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;

        let (tx, rx) = oneshot::channel();
        let handler = Arc::new(SessionHandler {
            session: Arc::clone(&self.session),
            handshake: Mutex::new(Some(tx)),
        });
        let connection = Connection::from_tcp(stream, self.config.connection.clone(), handler);
        connection.send(ShareMessage::InitialInfo(InitialInfoMessage {
            client_name: self.config.client_name.clone(),
            protocol_version: PROTOCOL_VERSION,
            display: self.config.display.clone(),
        }))?;

        let timeout = self.config.connection.call_timeout;
        let outcome = match time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ClientNetworkError::Declined(reason)),
            Ok(Err(_)) => Err(ClientNetworkError::Connection(ConnectionError::Closed(
                "closed during handshake".to_string(),
            ))),
            Err(_) => Err(ClientNetworkError::HandshakeTimedOut(timeout)),
        };
        if let Err(e) = outcome {
            connection.close();
            return Err(e);
        }

        info!(server = %addr, name = %self.config.client_name, "connected to server");
        self.session.attach(connection.clone()).await;
        Ok(connection)
    }

    /// Connects, serves the session until the connection drops, and
    /// reconnects.  Never returns; drop the task to stop.
    pub async fn run(&self) {
        loop {
            match self.connect().await {
                Ok(connection) => {
                    connection.closed().await;
                    self.session.detach().await;
                    info!(
                        "disconnected from server; reconnecting in {:?}",
                        self.config.reconnect_interval
                    );
                }
                Err(ClientNetworkError::Declined(reason)) => error!("server declined: {reason}"),
                Err(e) => warn!("{e}"),
            }
            time::sleep(self.config.reconnect_interval).await;
        }
    }
}
