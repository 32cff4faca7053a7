//! Per-peer message transport: the connection engine and the remote-file seam.

pub mod connection;
pub mod file_source;

pub use connection::{Connection, ConnectionConfig, ConnectionError, MessageHandler};
pub use file_source::{FileSource, RemoteFileSource, TransferError};
