//! Storage infrastructure: the server's TOML configuration file.
//!
//! A missing file is not an error; the server then runs on defaults.

pub mod config;
