//! NetShare client entry point.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ FileAccessController       -- tokens over this machine's files
//!  └─ ClientSession::new()       -- origin bookkeeping + desktop commands
//!  └─ token expiry pump          -- controller -> session.token_closed()
//!  └─ ClientConnection::run()    -- connect, handshake, reconnect loop
//! ```
//!
//! The headless build drives a [`MockDesktop`], which logs every clipboard,
//! drag-drop and input command instead of touching the OS.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netshare_client::application::session::ClientSession;
use netshare_client::infrastructure::network::{ClientConnection, ClientConnectionConfig};
use netshare_core::desktop::mock::MockDesktop;
use netshare_core::files::{FileAccessConfig, FileAccessController};
use netshare_core::transport::connection::ConnectionConfig;

#[derive(Debug, Parser)]
#[command(name = "netshare-client", version, about = "NetShare clipboard and drag-drop client")]
struct Args {
    /// Server address as `host:port`.
    #[arg(long, env = "NETSHARE_SERVER", default_value = "127.0.0.1:4441")]
    server: String,

    /// Name announced to the server; must match its `[[layout]]` entries.
    #[arg(long, env = "NETSHARE_NAME", default_value = "netshare-client")]
    name: String,

    /// Seconds to wait before reconnecting after a disconnect.
    #[arg(long, default_value_t = 5)]
    reconnect_secs: u64,

    /// Idle timeout in seconds of tokens issued to the server; 0 disables expiry.
    #[arg(long, default_value_t = 60)]
    token_timeout_secs: u64,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "NETSHARE_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!(name = %args.name, server = %args.server, "NetShare client starting");

    let (files, mut token_closed) = FileAccessController::new(FileAccessConfig::default());
    let token_timeout = (args.token_timeout_secs > 0).then(|| Duration::from_secs(args.token_timeout_secs));
    let session = Arc::new(ClientSession::new(
        Arc::new(MockDesktop::new()),
        Arc::new(files),
        token_timeout,
    ));

    // ── Token expiry pump ─────────────────────────────────────────────────────
    let expiry_session = Arc::clone(&session);
    tokio::spawn(async move {
        while let Some(token) = token_closed.recv().await {
            expiry_session.token_closed(token).await;
        }
    });

    let connection = ClientConnection::new(
        ClientConnectionConfig {
            server_addr: args.server,
            client_name: args.name,
            reconnect_interval: Duration::from_secs(args.reconnect_secs),
            connection: ConnectionConfig::default(),
            ..Default::default()
        },
        session,
    );

    tokio::select! {
        _ = connection.run() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("could not listen for Ctrl-C: {e}");
            }
            info!("shutdown signal received");
        }
    }

    info!("NetShare client stopped");
    Ok(())
}
