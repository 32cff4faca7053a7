//! Application layer of the client.
//!
//! - **`session`** – Answers the server's token and read requests, applies
//!   incoming payloads to the desktop, and reports local events.

pub mod session;
