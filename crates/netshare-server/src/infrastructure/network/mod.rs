//! Network layer for the server: the TCP listener and the handler that
//! binds each client connection to the application layer.

pub mod listener;

pub use listener::{ClientHandler, ClientListener, NetworkError};
