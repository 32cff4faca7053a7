//! netshare-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does netshare-client do? (for beginners)
//!
//! The client runs on every machine except the server's.  It:
//!
//! 1. Connects to the server and introduces itself with INITIAL_INFO.
//! 2. Reports local copies, drags and screen-edge hits to the server.
//! 3. Serves its own files to the server on request, through short-lived
//!    access tokens.
//! 4. Applies what the server sends: clipboard contents, drag-drop payloads,
//!    and forwarded keyboard and mouse input.

/// Application layer: the client session.
pub mod application;

/// Infrastructure layer: the connection to the server.
pub mod infrastructure;
