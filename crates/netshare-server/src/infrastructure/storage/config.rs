//! TOML-based configuration for the server application.
//!
//! Reads `ServerConfig` from an explicit path or from the platform-appropriate
//! config file:
//! - Windows:  `%APPDATA%\NetShare\server.toml`
//! - Linux:    `~/.config/netshare/server.toml`
//! - macOS:    `~/Library/Application Support/NetShare/server.toml`
//!
//! # Example file (for beginners)
//!
//! ```toml
//! [server]
//! name = "desk"
//! max_clients = 4
//!
//! [network]
//! port = 4441
//!
//! [transfer]
//! drag_token_timeout_ms = 30000
//!
//! [[layout]]
//! from = "desk"
//! edge = "right"
//! to = "laptop"
//!
//! [[layout]]
//! from = "laptop"
//! edge = "left"
//! to = "desk"
//! ```
//!
//! Every field has a default (`#[serde(default = "...")]`), so an empty or
//! missing file yields a working configuration.  Layout links are one-way:
//! list both directions to move back and forth.

use std::path::{Path, PathBuf};
use std::time::Duration;

use netshare_core::protocol::messages::Edge;

use crate::application::peers::Layout;
use netshare_core::transport::connection::ConnectionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub layout: Vec<LayoutLink>,
}

/// Identity and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Name of the server's own machine in `[[layout]]` links.
    #[serde(default = "default_name")]
    pub name: String,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Handshakes beyond this many connected clients are declined.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to listen on.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Encoded size above which messages are sent as chunks.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    /// Largest frame accepted from a client.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Largest chunked message accepted from a client once reassembled.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

/// Token lifetimes and operation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Idle timeout for clipboard tokens; `0` disables expiry.
    #[serde(default)]
    pub token_timeout_ms: u64,
    /// Idle timeout for drag-drop tokens; `0` disables expiry.
    #[serde(default = "default_drag_token_timeout_ms")]
    pub drag_token_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Finished-but-draining operations kept readable per controller.
    #[serde(default = "default_max_archived_operations")]
    pub max_archived_operations: usize,
}

/// Screen edge as written in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeName {
    Top,
    Bottom,
    Left,
    Right,
}

impl From<EdgeName> for Edge {
    fn from(edge: EdgeName) -> Self {
        match edge {
            EdgeName::Top => Edge::Top,
            EdgeName::Bottom => Edge::Bottom,
            EdgeName::Left => Edge::Left,
            EdgeName::Right => Edge::Right,
        }
    }
}

/// "Leaving `from` through `edge` enters `to`."
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutLink {
    pub from: String,
    pub edge: EdgeName,
    pub to: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "server".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    8
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4441
}
fn default_chunk_threshold() -> usize {
    netshare_core::protocol::chunk::DEFAULT_CHUNK_THRESHOLD
}
fn default_max_frame_size() -> usize {
    netshare_core::protocol::messages::DEFAULT_MAX_FRAME_SIZE
}
fn default_max_message_size() -> usize {
    netshare_core::protocol::chunk::DEFAULT_MAX_MESSAGE_SIZE
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_recv_buffer_size() -> usize {
    260 * 1024
}
fn default_drag_token_timeout_ms() -> u64 {
    60_000
}
fn default_sweep_interval_ms() -> u64 {
    2_000
}
fn default_max_archived_operations() -> usize {
    8
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            chunk_threshold: default_chunk_threshold(),
            max_frame_size: default_max_frame_size(),
            max_message_size: default_max_message_size(),
            call_timeout_ms: default_call_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            token_timeout_ms: 0,
            drag_token_timeout_ms: default_drag_token_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            max_archived_operations: default_max_archived_operations(),
        }
    }
}

impl ServerConfig {
    /// Edge links from every `[[layout]]` entry.
    pub fn layout(&self) -> Layout {
        let mut layout = Layout::new();
        for link in &self.layout {
            layout.link(link.from.clone(), link.edge.into(), link.to.clone());
        }
        layout
    }
}

impl NetworkConfig {
    /// `bind_address:port`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Per-connection engine settings.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            chunk_threshold: self.chunk_threshold,
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            recv_buffer_size: Some(self.recv_buffer_size),
            ..ConnectionConfig::default()
        }
    }
}

impl TransferConfig {
    pub fn clipboard_token_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.token_timeout_ms)
    }

    pub fn drag_token_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.drag_token_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("server.toml"))
}

/// Loads the config from `path`, or from [`config_file_path`] when `None`.
/// A missing file yields [`ServerConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("NetShare"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("netshare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("NetShare")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
