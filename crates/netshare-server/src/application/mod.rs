//! Application layer of the server.
//!
//! # What lives here? (for beginners)
//!
//! The application layer holds the server's decisions and state, with no
//! sockets or files of its own.  Peers are reached through
//! [`Connection`](netshare_core::Connection) handles and the local machine
//! through the [`LocalDesktop`](netshare_core::desktop::LocalDesktop) trait,
//! so every use case can be tested in memory.
//!
//! # Sub-modules
//!
//! - **`peers`**     – Connected clients, the edge layout, and which peer
//!   currently owns input focus.
//! - **`relay`**     – Which peer issued each access token, and forwarding of
//!   file reads to it.
//! - **`dragdrop`**  – The drag-drop state machine.
//! - **`clipboard`** – Clipboard broadcast.
//! - **`broker`**    – Routes each client message or local event to the
//!   modules above.

pub mod broker;
pub mod clipboard;
pub mod dragdrop;
pub mod peers;
pub mod relay;
