//! Integration tests for the client handshake over real TCP sockets.
//!
//! A stub server accepts one connection, checks INITIAL_INFO, and answers
//! with SERVER_OK (plus edge states) or CLIENT_DECLINED.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netshare_client::application::session::ClientSession;
use netshare_client::infrastructure::network::{
    ClientConnection, ClientConnectionConfig, ClientNetworkError,
};
use netshare_core::desktop::mock::MockDesktop;
use netshare_core::files::{FileAccessConfig, FileAccessController};
use netshare_core::protocol::messages::{
    ClientDeclinedMessage, Edge, EdgeStatesMessage, Envelope, ShareMessage, PROTOCOL_VERSION,
};
use netshare_core::transport::connection::{
    Connection, ConnectionConfig, ConnectionError, MessageHandler,
};
use tokio::net::TcpListener;

enum Answer {
    Accept,
    Decline(&'static str),
    Silent,
}

struct StubServer {
    answer: Answer,
}

#[async_trait]
impl MessageHandler for StubServer {
    async fn on_message(&self, connection: &Connection, envelope: Envelope) {
        let ShareMessage::InitialInfo(info) = envelope.message else {
            return;
        };
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
        match self.answer {
            Answer::Accept => {
                connection.send(ShareMessage::ServerOk).unwrap();
                let mut states = EdgeStatesMessage::default();
                states.set(Edge::Left);
                connection.send(ShareMessage::ClientEdgeStates(states)).unwrap();
            }
            Answer::Decline(reason) => {
                connection
                    .send(ShareMessage::ClientDeclined(ClientDeclinedMessage {
                        reason: reason.to_string(),
                    }))
                    .unwrap();
            }
            Answer::Silent => {}
        }
    }

    async fn on_closed(&self, _connection: &Connection, _reason: &ConnectionError) {}
}

async fn stub_server(answer: Answer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let conn = Connection::from_tcp(
            stream,
            ConnectionConfig::default(),
            Arc::new(StubServer { answer }),
        );
        conn.closed().await;
    });
    addr
}

fn client(addr: String, call_timeout: Duration) -> (ClientConnection, Arc<ClientSession>) {
    let (files, _closed) = FileAccessController::new(FileAccessConfig::default());
    let session = Arc::new(ClientSession::new(
        Arc::new(MockDesktop::new()),
        Arc::new(files),
        None,
    ));
    let config = ClientConnectionConfig {
        server_addr: addr,
        client_name: "laptop".to_string(),
        connection: ConnectionConfig {
            call_timeout,
            ..Default::default()
        },
        ..Default::default()
    };
    (ClientConnection::new(config, Arc::clone(&session)), session)
}

#[tokio::test]
async fn test_accepted_handshake_attaches_session_and_stores_edge_states() {
    // Arrange
    let addr = stub_server(Answer::Accept).await;
    let (client, session) = client(addr, Duration::from_secs(5));

    // Act
    let connection = client.connect().await.expect("handshake");

    // Assert
    assert!(session.is_connected().await);
    let mut expected = EdgeStatesMessage::default();
    expected.set(Edge::Left);
    for _ in 0..200 {
        if session.edge_states().await == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.edge_states().await, expected);
    connection.close();
}

#[tokio::test]
async fn test_declined_handshake_reports_reason() {
    let addr = stub_server(Answer::Decline("a client named \"laptop\" is already connected")).await;
    let (client, session) = client(addr, Duration::from_secs(5));

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientNetworkError::Declined(reason)) if reason.contains("already connected")));
    assert!(!session.is_connected().await);
}

#[tokio::test]
async fn test_silent_server_times_out_handshake() {
    let addr = stub_server(Answer::Silent).await;
    let (client, _session) = client(addr, Duration::from_millis(100));

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientNetworkError::HandshakeTimedOut(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_connect_failure() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let (client, _session) = client(addr, Duration::from_secs(1));

    let result = client.connect().await;

    assert!(matches!(result, Err(ClientNetworkError::ConnectFailed { .. })));
}
