//! NetShare server entry point.
//!
//! Loads the TOML configuration, wires the application layer to the TCP
//! listener, and runs until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- server.toml or defaults (--init-config writes them)
//!  └─ FileAccessController      -- tokens over this machine's files
//!  └─ Broker::assemble()        -- peers, relay, drag-drop, clipboard
//!  └─ token expiry pump         -- controller -> broker.token_closed()
//!  └─ ClientListener::run()     -- one Connection per client
//! ```
//!
//! The headless build drives a [`MockDesktop`], which logs every clipboard,
//! drag-drop and input command instead of touching the OS.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netshare_core::desktop::mock::MockDesktop;
use netshare_core::files::{FileAccessConfig, FileAccessController};
use netshare_server::application::broker::{Broker, BrokerSettings};
use netshare_server::application::clipboard::ClipboardConfig;
use netshare_server::application::dragdrop::DragDropConfig;
use netshare_server::infrastructure::network::ClientListener;
use netshare_server::infrastructure::storage::config::{
    config_file_path, load_config, save_config, ServerConfig,
};

#[derive(Debug, Parser)]
#[command(name = "netshare-server", version, about = "NetShare clipboard and drag-drop server")]
struct Args {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, env = "NETSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Write a configuration file with every default filled in, then exit.
    #[arg(long)]
    init_config: bool,
}

fn broker_settings(config: &ServerConfig) -> BrokerSettings {
    BrokerSettings {
        name: config.server.name.clone(),
        max_clients: config.server.max_clients,
        layout: config.layout(),
        dragdrop: DragDropConfig {
            token_timeout: config.transfer.drag_token_timeout(),
            max_archived: config.transfer.max_archived_operations,
        },
        clipboard: ClipboardConfig {
            token_timeout: config.transfer.clipboard_token_timeout(),
            max_archived: config.transfer.max_archived_operations,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.init_config {
        let path = match args.config {
            Some(path) => path,
            None => config_file_path()?,
        };
        save_config(&ServerConfig::default(), &path)?;
        println!("wrote default configuration to {}", path.display());
        return Ok(());
    }
    let config = load_config(args.config.as_deref())?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(name = %config.server.name, "NetShare server starting");

    let (files, mut token_closed) = FileAccessController::new(FileAccessConfig {
        sweep_interval: config.transfer.sweep_interval(),
        ..FileAccessConfig::default()
    });
    let desktop = Arc::new(MockDesktop::new());
    let broker = Broker::assemble(broker_settings(&config), Arc::new(files), desktop);

    // ── Token expiry pump ─────────────────────────────────────────────────────
    let expiry_broker = Arc::clone(&broker);
    tokio::spawn(async move {
        while let Some(token) = token_closed.recv().await {
            expiry_broker.token_closed(token).await;
        }
    });

    // ── Listener ──────────────────────────────────────────────────────────────
    let listener = ClientListener::bind(
        &config.network.listen_address(),
        Arc::clone(&broker),
        config.network.connection_config(),
    )
    .await?;
    info!(addr = %listener.local_addr()?, "listening for clients.  Press Ctrl-C to exit.");

    tokio::select! {
        _ = listener.run() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("could not listen for Ctrl-C: {e}");
            }
            info!("shutdown signal received");
        }
    }

    info!("NetShare server stopped");
    Ok(())
}
