//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: the TCP listener and the configuration
//! file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `netshare_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
