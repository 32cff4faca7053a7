//! # netshare-core
//!
//! Shared library for NetShare containing the wire protocol, the per-peer
//! connection engine, and the file access controller.
//!
//! This crate is used by both the server and client applications.
//!
//! # Architecture overview (for beginners)
//!
//! NetShare lets several machines share one keyboard and mouse, one
//! clipboard, and drag-and-drop.  One machine runs the **server**: it decides
//! which machine currently owns input focus and brokers clipboard and
//! drag-drop payloads.  The others run a **client**.
//!
//! File contents are never pushed.  A payload only lists files; whoever
//! wants the bytes asks the origin for an access token and pulls them in
//! pieces.
//!
//! This crate (`netshare-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   length-prefixed frame with a type tag and a 16-byte message id; large
//!   messages are cut into MESSAGE_PART chunks.
//!
//! - **`transport`** – The [`Connection`] engine: framing, reassembly,
//!   duplicate suppression, and request/response calls on top of one
//!   socket, plus the [`FileSource`] seam used to pull remote files.
//!
//! - **`files`** – The [`FileAccessController`], which hands out access
//!   tokens over local files and expires idle ones.
//!
//! - **`domain`** – Payload and operation types shared by both sides.
//!
//! - **`desktop`** – The boundary to OS clipboard, drag-drop and input APIs.

pub mod desktop;
pub mod domain;
pub mod files;
pub mod protocol;
pub mod transport;

pub use domain::operation::{DragDropState, OperationId};
pub use domain::payload::{ClipboardPayload, FileGroup, LocalFileGroup, VirtualFile};
pub use files::{FileAccessConfig, FileAccessController, FileAccessError};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::{Envelope, ShareMessage};
pub use transport::connection::{Connection, ConnectionConfig, ConnectionError, MessageHandler};
pub use transport::file_source::{FileSource, RemoteFileSource, TransferError};
