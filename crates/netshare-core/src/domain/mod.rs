//! Domain types shared by every NetShare peer.
//!
//! Nothing in here touches sockets; [`payload`] only reads the filesystem
//! when an origin builds a [`payload::LocalFileGroup`] from dropped paths.

/// Clipboard / drag-drop payloads and virtual file groups.
pub mod payload;

/// Drag-drop operation ids and lifecycle states.
pub mod operation;
