//! Protocol module containing message types, the binary codec, and chunking.

pub mod chunk;
pub mod codec;
pub mod messages;

pub use chunk::{encode_frames, Reassembler, DEFAULT_CHUNK_THRESHOLD};
pub use codec::{decode_frame, decode_message, encode_message, ProtocolError};
pub use messages::*;
