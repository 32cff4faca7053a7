//! Binary codec for encoding and decoding NetShare protocol messages.
//!
//! Wire format:
//! ```text
//! [total_len:4][msg_type:1][message_id:16][body:N]
//! ```
//! `total_len` counts every byte of the frame including itself.  All
//! multi-byte integers are little-endian.  Strings and byte blobs inside a
//! body carry a 4-byte length prefix; nested identifiers are raw 16-byte
//! UUIDs.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::payload::{ClipboardPayload, FileGroup, VirtualFile};
use crate::protocol::messages::{
    ClientDeclinedMessage, ClipboardDataMessage, DisplayArea, DisplayConfigMessage,
    DragDropDataMessage, Edge, EdgeStatesMessage, Envelope, FileStreamCloseRequestMessage,
    FileStreamReadRequestMessage, InitialInfoMessage, InputData, MessagePartMessage, MessageType,
    ShareMessage, FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The declared frame length is below the header size or above the
    /// configured maximum.
    #[error("invalid frame length {length} (allowed {min}..={max})")]
    InvalidFrameLength { length: usize, min: usize, max: usize },

    /// The body could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A message does not fit the 32-bit length field.
    #[error("message of {0} bytes is too large to encode")]
    MessageTooLarge(usize),

    /// Chunks of one transfer disagree with each other or overflow the
    /// declared total size.
    #[error("chunk stream for transfer {transfer_id} is inconsistent: {detail}")]
    InconsistentChunks { transfer_id: Uuid, detail: String },

    /// A chunked transfer announced a total size of zero or above the limit.
    #[error("transfer {transfer_id} declares {declared} bytes (allowed 1..={max})")]
    DeclaredSizeOutOfRange { transfer_id: Uuid, declared: usize, max: usize },

    /// The peer opened more concurrent chunked transfers than allowed.
    #[error("more than {limit} chunked transfers in flight")]
    TooManyTransfers { limit: usize },

    /// The length prefix disagrees with the number of bytes in the frame.
    #[error("frame declares {declared} bytes but holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into one complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLarge`] if the frame would not fit the
/// 32-bit length prefix.
///
/// # Examples
///
/// ```rust
/// use netshare_core::protocol::{decode_message, encode_message};
/// use netshare_core::protocol::messages::{Envelope, ShareMessage};
///
/// let env = Envelope::new(ShareMessage::ServerOk);
/// let bytes = encode_message(&env).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, env);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + 64);

    // Length is patched in once the body is known.
    buf.extend_from_slice(&[0u8; LENGTH_PREFIX_SIZE]);
    buf.push(envelope.message_type() as u8);
    buf.extend_from_slice(envelope.id.as_bytes());
    encode_body(&mut buf, &envelope.message);

    let total = u32::try_from(buf.len()).map_err(|_| ProtocolError::MessageTooLarge(buf.len()))?;
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&total.to_le_bytes());
    Ok(buf)
}

/// Decodes one [`Envelope`] from the beginning of `bytes`.
///
/// Returns the envelope and the number of bytes the frame occupied, so the
/// caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when `bytes` holds less than
/// one whole frame, and other variants when the frame is malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(Envelope, usize), ProtocolError> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        });
    }
    let total = read_frame_length(bytes);
    if total < FRAME_HEADER_SIZE {
        return Err(ProtocolError::InvalidFrameLength {
            length: total,
            min: FRAME_HEADER_SIZE,
            max: u32::MAX as usize,
        });
    }
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }
    Ok((decode_frame(&bytes[..total])?, total))
}

/// Decodes a frame whose bytes are exactly `frame`.
///
/// # Errors
///
/// Returns [`ProtocolError::LengthMismatch`] when the length prefix does not
/// equal `frame.len()`, and other variants for unknown types or malformed
/// bodies.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope, ProtocolError> {
    require_len(frame, FRAME_HEADER_SIZE, "frame header")?;
    let declared = read_frame_length(frame);
    if declared != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    let type_byte = frame[LENGTH_PREFIX_SIZE];
    let msg_type =
        MessageType::try_from(type_byte).map_err(|_| ProtocolError::UnknownMessageType(type_byte))?;
    let id = read_uuid(frame, LENGTH_PREFIX_SIZE + 1)?;
    let message = decode_body(msg_type, &frame[FRAME_HEADER_SIZE..])?;
    Ok(Envelope { id, message })
}

/// Reads the little-endian `total_len` prefix.  `bytes` must hold at least
/// [`LENGTH_PREFIX_SIZE`] bytes.
pub fn read_frame_length(bytes: &[u8]) -> usize {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

// ── Body encoding ─────────────────────────────────────────────────────────────

fn encode_body(buf: &mut Vec<u8>, msg: &ShareMessage) {
    match msg {
        ShareMessage::InitialInfo(m) => encode_initial_info(buf, m),
        ShareMessage::ServerOk
        | ShareMessage::EdgeHit(_)
        | ShareMessage::ClientActive
        | ShareMessage::ClientInactive
        | ShareMessage::CancelAnyDragDrop => {} // empty body
        ShareMessage::MessagePart(m) => encode_message_part(buf, m),
        ShareMessage::DisplayConfig(m) => encode_display_config(buf, m),
        ShareMessage::ClientDeclined(m) => write_string(buf, &m.reason),
        ShareMessage::InputData(m) => encode_input_data(buf, m),
        ShareMessage::ClipboardData(m) => {
            buf.extend_from_slice(m.operation_id.as_bytes());
            encode_payload(buf, &m.payload);
        }
        ShareMessage::DragDropData(m) => {
            buf.extend_from_slice(m.operation_id.as_bytes());
            encode_payload(buf, &m.payload);
        }
        ShareMessage::ClientEdgeStates(m) => encode_edge_states(buf, m),
        ShareMessage::DragDropSuccess { operation_id }
        | ShareMessage::DragDropCancelled { operation_id }
        | ShareMessage::RequestFileGroupToken { operation_id }
        | ShareMessage::DragDropComplete { operation_id } => {
            buf.extend_from_slice(operation_id.as_bytes())
        }
        ShareMessage::FileGroupTokenResponse { token } => buf.extend_from_slice(token.as_bytes()),
        ShareMessage::FileStreamReadRequest(m) => {
            buf.extend_from_slice(m.token.as_bytes());
            buf.extend_from_slice(m.file_id.as_bytes());
            buf.extend_from_slice(&m.read_len.to_le_bytes());
        }
        ShareMessage::FileStreamReadResponse { data } => write_blob(buf, data),
        ShareMessage::FileStreamReadError { reason } => write_string(buf, reason),
        ShareMessage::FileStreamCloseRequest(m) => {
            buf.extend_from_slice(m.token.as_bytes());
            buf.extend_from_slice(m.file_id.as_bytes());
        }
    }
}

fn encode_initial_info(buf: &mut Vec<u8>, m: &InitialInfoMessage) {
    write_string(buf, &m.client_name);
    buf.extend_from_slice(&m.protocol_version.to_le_bytes());
    encode_display_config(buf, &m.display);
}

fn encode_message_part(buf: &mut Vec<u8>, m: &MessagePartMessage) {
    buf.extend_from_slice(&m.total_size.to_le_bytes());
    write_blob(buf, &m.data);
}

fn encode_display_config(buf: &mut Vec<u8>, m: &DisplayConfigMessage) {
    buf.extend_from_slice(&(m.displays.len() as u32).to_le_bytes());
    for display in &m.displays {
        write_string(buf, &display.name);
        buf.extend_from_slice(&display.left.to_le_bytes());
        buf.extend_from_slice(&display.top.to_le_bytes());
        buf.extend_from_slice(&display.right.to_le_bytes());
        buf.extend_from_slice(&display.bottom.to_le_bytes());
    }
}

fn encode_input_data(buf: &mut Vec<u8>, m: &InputData) {
    buf.push(m.code);
    buf.extend_from_slice(&m.param1.to_le_bytes());
    buf.extend_from_slice(&m.param2.to_le_bytes());
}

fn encode_edge_states(buf: &mut Vec<u8>, m: &EdgeStatesMessage) {
    buf.push(u8::from(m.left));
    buf.push(u8::from(m.right));
    buf.push(u8::from(m.top));
    buf.push(u8::from(m.bottom));
}

/// Payload kind tags inside clipboard and drag-drop bodies.
const PAYLOAD_TEXT: u8 = 0x01;
const PAYLOAD_IMAGE: u8 = 0x02;
const PAYLOAD_FILES: u8 = 0x03;

fn encode_payload(buf: &mut Vec<u8>, payload: &ClipboardPayload) {
    match payload {
        ClipboardPayload::Text(text) => {
            buf.push(PAYLOAD_TEXT);
            write_string(buf, text);
        }
        ClipboardPayload::Image(bytes) => {
            buf.push(PAYLOAD_IMAGE);
            write_blob(buf, bytes);
        }
        ClipboardPayload::Files(group) => {
            buf.push(PAYLOAD_FILES);
            buf.extend_from_slice(group.access_token.as_bytes());
            buf.extend_from_slice(&(group.entries.len() as u32).to_le_bytes());
            for entry in &group.entries {
                buf.extend_from_slice(entry.file_id.as_bytes());
                buf.push(u8::from(entry.is_directory));
                buf.extend_from_slice(&entry.size.to_le_bytes());
                buf.extend_from_slice(&entry.last_write_unix_ms.to_le_bytes());
                write_string(buf, &entry.relative_path);
            }
        }
    }
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_body(msg_type: MessageType, body: &[u8]) -> Result<ShareMessage, ProtocolError> {
    let mut r = BodyReader::new(body, msg_type);
    let msg = match msg_type {
        MessageType::InitialInfo => ShareMessage::InitialInfo(InitialInfoMessage {
            client_name: r.string()?,
            protocol_version: r.u32()?,
            display: decode_display_config(&mut r)?,
        }),
        MessageType::ServerOk => ShareMessage::ServerOk,
        MessageType::MessagePart => ShareMessage::MessagePart(MessagePartMessage {
            total_size: r.u32()?,
            data: r.blob()?,
        }),
        MessageType::DisplayConfig => ShareMessage::DisplayConfig(decode_display_config(&mut r)?),
        MessageType::ClientDeclined => {
            ShareMessage::ClientDeclined(ClientDeclinedMessage { reason: r.string()? })
        }
        MessageType::InputData => ShareMessage::InputData(InputData {
            code: r.u8()?,
            param1: r.i16()?,
            param2: r.i16()?,
        }),
        MessageType::ClipboardData => ShareMessage::ClipboardData(ClipboardDataMessage {
            operation_id: r.uuid()?,
            payload: decode_payload(&mut r)?,
        }),
        MessageType::EdgeHitTop => ShareMessage::EdgeHit(Edge::Top),
        MessageType::EdgeHitBottom => ShareMessage::EdgeHit(Edge::Bottom),
        MessageType::EdgeHitRight => ShareMessage::EdgeHit(Edge::Right),
        MessageType::EdgeHitLeft => ShareMessage::EdgeHit(Edge::Left),
        MessageType::ClientActive => ShareMessage::ClientActive,
        MessageType::ClientInactive => ShareMessage::ClientInactive,
        MessageType::DragDropData => ShareMessage::DragDropData(DragDropDataMessage {
            operation_id: r.uuid()?,
            payload: decode_payload(&mut r)?,
        }),
        MessageType::ClientEdgeStates => ShareMessage::ClientEdgeStates(EdgeStatesMessage {
            left: r.bool()?,
            right: r.bool()?,
            top: r.bool()?,
            bottom: r.bool()?,
        }),
        MessageType::DragDropSuccess => ShareMessage::DragDropSuccess {
            operation_id: r.uuid()?,
        },
        MessageType::DragDropCancelled => ShareMessage::DragDropCancelled {
            operation_id: r.uuid()?,
        },
        MessageType::RequestFileGroupToken => ShareMessage::RequestFileGroupToken {
            operation_id: r.uuid()?,
        },
        MessageType::FileGroupTokenResponse => ShareMessage::FileGroupTokenResponse {
            token: r.uuid()?,
        },
        MessageType::FileStreamReadRequest => {
            ShareMessage::FileStreamReadRequest(FileStreamReadRequestMessage {
                token: r.uuid()?,
                file_id: r.uuid()?,
                read_len: r.u32()?,
            })
        }
        MessageType::FileStreamReadResponse => ShareMessage::FileStreamReadResponse {
            data: r.blob()?,
        },
        MessageType::FileStreamReadError => ShareMessage::FileStreamReadError {
            reason: r.string()?,
        },
        MessageType::FileStreamCloseRequest => {
            ShareMessage::FileStreamCloseRequest(FileStreamCloseRequestMessage {
                token: r.uuid()?,
                file_id: r.uuid()?,
            })
        }
        MessageType::CancelAnyDragDrop => ShareMessage::CancelAnyDragDrop,
        MessageType::DragDropComplete => ShareMessage::DragDropComplete {
            operation_id: r.uuid()?,
        },
    };
    Ok(msg)
}

fn decode_display_config(r: &mut BodyReader<'_>) -> Result<DisplayConfigMessage, ProtocolError> {
    let count = r.u32()? as usize;
    // Each display needs at least 4 (name len) + 16 (rect) bytes.
    r.require_remaining(count.saturating_mul(20), "display list")?;
    let mut displays = Vec::with_capacity(count);
    for _ in 0..count {
        displays.push(DisplayArea {
            name: r.string()?,
            left: r.i32()?,
            top: r.i32()?,
            right: r.i32()?,
            bottom: r.i32()?,
        });
    }
    Ok(DisplayConfigMessage { displays })
}

fn decode_payload(r: &mut BodyReader<'_>) -> Result<ClipboardPayload, ProtocolError> {
    let kind = r.u8()?;
    match kind {
        PAYLOAD_TEXT => Ok(ClipboardPayload::Text(r.string()?)),
        PAYLOAD_IMAGE => Ok(ClipboardPayload::Image(r.blob()?)),
        PAYLOAD_FILES => {
            let access_token = r.uuid()?;
            let count = r.u32()? as usize;
            // 16 (id) + 1 (dir flag) + 8 (size) + 8 (mtime) + 4 (path len)
            r.require_remaining(count.saturating_mul(37), "file entries")?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let file_id = r.uuid()?;
                let is_directory = r.bool()?;
                let size = r.u64()?;
                let last_write_unix_ms = r.i64()?;
                let relative_path = r.string()?;
                entries.push(VirtualFile {
                    file_id,
                    relative_path,
                    size,
                    last_write_unix_ms,
                    is_directory,
                });
            }
            Ok(ClipboardPayload::Files(FileGroup {
                access_token,
                entries,
            }))
        }
        other => Err(ProtocolError::MalformedPayload(format!(
            "unknown payload kind: {other}"
        ))),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Sequential reader over a message body.  Every read is bounds-checked and
/// reports the message type it was decoding.
struct BodyReader<'a> {
    buf: &'a [u8],
    off: usize,
    context: MessageType,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8], context: MessageType) -> Self {
        Self { buf, off: 0, context }
    }

    fn require_remaining(&self, needed: usize, what: &str) -> Result<(), ProtocolError> {
        let available = self.buf.len() - self.off;
        if available < needed {
            return Err(ProtocolError::MalformedPayload(format!(
                "{:?}.{what}: need {needed} bytes at offset {}, got {available}",
                self.context, self.off
            )));
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self, what: &str) -> Result<[u8; N], ProtocolError> {
        self.require_remaining(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.off..self.off + N]);
        self.off += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>("u8")?[0])
    }

    fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    fn i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.take("i16")?))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take("u32")?))
    }

    fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take("i32")?))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.take("u64")?))
    }

    fn i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take("i64")?))
    }

    fn uuid(&mut self) -> Result<Uuid, ProtocolError> {
        Ok(Uuid::from_bytes(self.take("uuid")?))
    }

    fn blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.u32()? as usize;
        self.require_remaining(len, "blob")?;
        let out = self.buf[self.off..self.off + len].to_vec();
        self.off += len;
        Ok(out)
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.blob()?;
        String::from_utf8(bytes)
            .map_err(|e| ProtocolError::MalformedPayload(format!("{:?}: invalid UTF-8: {e}", self.context)))
    }
}

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    let bytes: [u8; 16] = buf
        .get(offset..offset + 16)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 16 bytes for UUID at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })?;
    Ok(Uuid::from_bytes(bytes))
}

/// Writes a 4-byte length prefix followed by the UTF-8 string bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_blob(buf, s.as_bytes());
}

/// Writes a 4-byte length prefix followed by the raw bytes.
fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: ShareMessage) -> ShareMessage {
        let env = Envelope::new(msg);
        let encoded = encode_message(&env).expect("encode failed");
        let (decoded, consumed) = decode_message(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len(), "consumed bytes should equal total encoded size");
        assert_eq!(decoded.id, env.id, "message id must survive the round trip");
        decoded.message
    }

    fn sample_files() -> ClipboardPayload {
        ClipboardPayload::Files(FileGroup {
            access_token: Uuid::new_v4(),
            entries: vec![
                VirtualFile {
                    file_id: Uuid::new_v4(),
                    relative_path: "photos".to_string(),
                    size: 0,
                    last_write_unix_ms: 0,
                    is_directory: true,
                },
                VirtualFile {
                    file_id: Uuid::new_v4(),
                    relative_path: "photos/été.jpg".to_string(),
                    size: u64::MAX,
                    last_write_unix_ms: -1,
                    is_directory: false,
                },
            ],
        })
    }

    #[test]
    fn test_header_layout_is_little_endian_length_type_id() {
        // Arrange
        let env = Envelope::new(ShareMessage::ServerOk);

        // Act
        let bytes = encode_message(&env).unwrap();

        // Assert
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(&bytes[0..4], &(FRAME_HEADER_SIZE as u32).to_le_bytes());
        assert_eq!(bytes[4], MessageType::ServerOk as u8);
        assert_eq!(&bytes[5..21], env.id.as_bytes());
    }

    #[test]
    fn test_initial_info_round_trip() {
        let msg = ShareMessage::InitialInfo(InitialInfoMessage {
            client_name: "laptop".to_string(),
            protocol_version: 1,
            display: DisplayConfigMessage {
                displays: vec![DisplayArea {
                    name: "DP-1".to_string(),
                    left: -1920,
                    top: 0,
                    right: 0,
                    bottom: 1080,
                }],
            },
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_files_payload_round_trip_preserves_extremes() {
        let msg = ShareMessage::DragDropData(DragDropDataMessage {
            operation_id: Uuid::new_v4(),
            payload: sample_files(),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_empty_string_and_empty_blob_round_trip() {
        let text = ShareMessage::ClipboardData(ClipboardDataMessage {
            operation_id: Uuid::nil(),
            payload: ClipboardPayload::Text(String::new()),
        });
        let data = ShareMessage::FileStreamReadResponse { data: Vec::new() };
        assert_eq!(round_trip(text.clone()), text);
        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_64k_blob_round_trip() {
        let msg = ShareMessage::ClipboardData(ClipboardDataMessage {
            operation_id: Uuid::new_v4(),
            payload: ClipboardPayload::Image((0..65_536u32).map(|i| (i % 251) as u8).collect()),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_input_data_round_trip_preserves_signed_params() {
        let msg = ShareMessage::InputData(InputData {
            code: 0xFF,
            param1: i16::MIN,
            param2: i16::MAX,
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_decode_unknown_message_type_is_error() {
        let mut bytes = encode_message(&Envelope::new(ShareMessage::ServerOk)).unwrap();
        bytes[4] = 0x63;
        assert_eq!(
            decode_message(&bytes),
            Err(ProtocolError::UnknownMessageType(0x63))
        );
    }

    #[test]
    fn test_decode_partial_frame_reports_insufficient_data() {
        let bytes = encode_message(&Envelope::new(ShareMessage::DragDropComplete {
            operation_id: Uuid::new_v4(),
        }))
        .unwrap();
        let result = decode_message(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_decode_length_below_header_is_invalid() {
        let mut bytes = encode_message(&Envelope::new(ShareMessage::ServerOk)).unwrap();
        bytes[0..4].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::InvalidFrameLength { length: 3, .. })
        ));
    }

    #[test]
    fn test_decode_truncated_body_is_malformed() {
        let env = Envelope::new(ShareMessage::FileStreamReadError {
            reason: "gone".to_string(),
        });
        let mut bytes = encode_message(&env).unwrap();
        // Drop the last body byte but keep the length prefix consistent.
        bytes.pop();
        let len = bytes.len() as u32;
        bytes[0..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_frame_rejects_bytes_beyond_declared_length() {
        // Arrange
        let mut bytes = encode_message(&Envelope::new(ShareMessage::DragDropComplete {
            operation_id: Uuid::new_v4(),
        }))
        .unwrap();
        let declared = bytes.len();
        bytes.extend_from_slice(&[0xEE; 3]);

        // Act
        let result = decode_frame(&bytes);

        // Assert
        assert_eq!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared,
                actual: declared + 3,
            })
        );
    }

    #[test]
    fn test_decode_frame_rejects_bytes_short_of_declared_length() {
        let mut bytes = encode_message(&Envelope::new(ShareMessage::FileGroupTokenResponse {
            token: Uuid::new_v4(),
        }))
        .unwrap();
        bytes.truncate(bytes.len() - 4);

        assert!(matches!(
            decode_frame(&bytes),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_payload_kind() {
        let env = Envelope::new(ShareMessage::ClipboardData(ClipboardDataMessage {
            operation_id: Uuid::new_v4(),
            payload: ClipboardPayload::Text("x".to_string()),
        }));
        let mut bytes = encode_message(&env).unwrap();
        bytes[FRAME_HEADER_SIZE + 16] = 0x09;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_two_frames_in_one_buffer_decode_independently() {
        let first = Envelope::new(ShareMessage::ClientActive);
        let second = Envelope::new(ShareMessage::EdgeHit(Edge::Right));
        let mut buf = encode_message(&first).unwrap();
        buf.extend_from_slice(&encode_message(&second).unwrap());

        let (a, used) = decode_message(&buf).unwrap();
        let (b, _) = decode_message(&buf[used..]).unwrap();

        assert_eq!(a, first);
        assert_eq!(b, second);
    }
}
