//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `netshare_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`network`** – TCP connection to the server, handshake, and automatic
//!   reconnection.

pub mod network;
