//! TCP listener and per-client message handler.
//!
//! Every accepted socket becomes a [`Connection`] driven by a
//! [`ClientHandler`].  The handler only accepts INITIAL_INFO until the
//! handshake succeeds; afterwards it hands every message to the [`Broker`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use netshare_core::protocol::messages::{Envelope, ShareMessage};
use netshare_core::transport::connection::{
    Connection, ConnectionConfig, ConnectionError, MessageHandler,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::broker::Broker;
use crate::application::peers::RemotePeer;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Accepts client connections and attaches a [`ClientHandler`] to each.
pub struct ClientListener {
    listener: TcpListener,
    broker: Arc<Broker>,
    config: ConnectionConfig,
}

impl ClientListener {
    pub async fn bind(
        addr: &str,
        broker: Arc<Broker>,
        config: ConnectionConfig,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            broker,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "client connected");
                    let handler = Arc::new(ClientHandler::new(Arc::clone(&self.broker)));
                    Connection::from_tcp(stream, self.config.clone(), handler);
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
}

/// Message handler for one client connection.
pub struct ClientHandler {
    broker: Arc<Broker>,
    peer: Mutex<Option<RemotePeer>>,
}

impl ClientHandler {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            peer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MessageHandler for ClientHandler {
    async fn on_message(&self, connection: &Connection, envelope: Envelope) {
        let registered = self.peer.lock().await.clone();
        if let Some(peer) = registered {
            self.broker.handle_client_message(&peer, envelope).await;
            return;
        }

        let message_type = envelope.message_type();
        let ShareMessage::InitialInfo(info) = envelope.message else {
            warn!(connection = %connection.name(), message = ?message_type, "message before handshake; closing");
            connection.close();
            return;
        };
        match self.broker.register_client(connection, info).await {
            Ok(peer) => {
                info!(client = %peer.name, connection = %connection.name(), "handshake complete");
                *self.peer.lock().await = Some(peer);
            }
            Err(_) => connection.close(),
        }
    }

    async fn on_closed(&self, connection: &Connection, reason: &ConnectionError) {
        let peer = self.peer.lock().await.take();
        match peer {
            Some(peer) => {
                info!(client = %peer.name, "client disconnected: {reason}");
                self.broker.client_disconnected(&peer).await;
            }
            None => debug!(connection = %connection.name(), "unregistered connection closed: {reason}"),
        }
    }
}
