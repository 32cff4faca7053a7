//! All NetShare protocol message types.
//!
//! Every frame carries a 16-byte message id next to its type tag.  Ids are
//! random, except that a reply reuses the id of the request it answers (see
//! [`Envelope::reply`]) and every chunk of one large message shares a
//! transfer id.

use uuid::Uuid;

use crate::domain::payload::ClipboardPayload;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version announced in [`InitialInfoMessage`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the `totalLength` prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed frame header: length (4) + type (1) + message id (16).
pub const FRAME_HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + 1 + 16;

/// Default upper bound on a single frame, including its header.
///
/// Frames above the chunk threshold are split before they reach the socket,
/// so a well-behaved peer never comes close to this limit.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Identifier carried in every frame header.
pub type MessageId = Uuid;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type tags.  Values are fixed for interoperability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    InitialInfo = 1,
    ServerOk = 4,
    MessagePart = 5,
    DisplayConfig = 6,
    ClientDeclined = 8,
    InputData = 9,
    ClipboardData = 10,
    EdgeHitTop = 11,
    EdgeHitBottom = 12,
    EdgeHitRight = 13,
    EdgeHitLeft = 14,
    ClientActive = 15,
    ClientInactive = 16,
    DragDropData = 17,
    ClientEdgeStates = 18,
    DragDropSuccess = 19,
    DragDropCancelled = 20,
    RequestFileGroupToken = 21,
    FileGroupTokenResponse = 22,
    FileStreamReadRequest = 23,
    FileStreamReadResponse = 24,
    FileStreamReadError = 25,
    FileStreamCloseRequest = 26,
    CancelAnyDragDrop = 27,
    DragDropComplete = 28,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(MessageType::InitialInfo),
            4 => Ok(MessageType::ServerOk),
            5 => Ok(MessageType::MessagePart),
            6 => Ok(MessageType::DisplayConfig),
            8 => Ok(MessageType::ClientDeclined),
            9 => Ok(MessageType::InputData),
            10 => Ok(MessageType::ClipboardData),
            11 => Ok(MessageType::EdgeHitTop),
            12 => Ok(MessageType::EdgeHitBottom),
            13 => Ok(MessageType::EdgeHitRight),
            14 => Ok(MessageType::EdgeHitLeft),
            15 => Ok(MessageType::ClientActive),
            16 => Ok(MessageType::ClientInactive),
            17 => Ok(MessageType::DragDropData),
            18 => Ok(MessageType::ClientEdgeStates),
            19 => Ok(MessageType::DragDropSuccess),
            20 => Ok(MessageType::DragDropCancelled),
            21 => Ok(MessageType::RequestFileGroupToken),
            22 => Ok(MessageType::FileGroupTokenResponse),
            23 => Ok(MessageType::FileStreamReadRequest),
            24 => Ok(MessageType::FileStreamReadResponse),
            25 => Ok(MessageType::FileStreamReadError),
            26 => Ok(MessageType::FileStreamCloseRequest),
            27 => Ok(MessageType::CancelAnyDragDrop),
            28 => Ok(MessageType::DragDropComplete),
            _ => Err(()),
        }
    }
}

impl MessageType {
    /// Returns `true` for the types a blocking call may legitimately receive
    /// as its answer.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageType::FileGroupTokenResponse
                | MessageType::FileStreamReadResponse
                | MessageType::FileStreamReadError
        )
    }
}

// ── Shared enums ──────────────────────────────────────────────────────────────

/// Screen edge a cursor can leave through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Top,
    Bottom,
    Right,
    Left,
}

impl Edge {
    /// All four edges, in wire-tag order.
    pub const ALL: [Edge; 4] = [Edge::Top, Edge::Bottom, Edge::Right, Edge::Left];

    /// The edge on the far side of a neighbouring screen.
    pub fn opposite(self) -> Edge {
        match self {
            Edge::Top => Edge::Bottom,
            Edge::Bottom => Edge::Top,
            Edge::Right => Edge::Left,
            Edge::Left => Edge::Right,
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// One monitor as reported by a client's display enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayArea {
    pub name: String,
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// DISPLAY_CONFIG (6): a client's current monitor layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayConfigMessage {
    pub displays: Vec<DisplayArea>,
}

/// INITIAL_INFO (1): first message a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialInfoMessage {
    /// Name the client is known by in the server's layout.
    pub client_name: String,
    /// Must equal [`PROTOCOL_VERSION`] for the server to accept.
    pub protocol_version: u32,
    pub display: DisplayConfigMessage,
}

/// CLIENT_DECLINED (8): the server refused a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDeclinedMessage {
    pub reason: String,
}

/// MESSAGE_PART (5): one chunk of a message too large for a single frame.
///
/// The frame's message id is the transfer id shared by every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePartMessage {
    /// Size in bytes of the complete encoded message being transferred.
    pub total_size: u32,
    /// This chunk's slice of the encoded message.
    pub data: Vec<u8>,
}

/// INPUT_DATA (9): one already-normalised input event.
///
/// Translation to and from OS input happens outside the core; the codes are
/// opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputData {
    pub code: u8,
    pub param1: i16,
    pub param2: i16,
}

/// CLIPBOARD_DATA (10): new clipboard content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardDataMessage {
    pub operation_id: Uuid,
    pub payload: ClipboardPayload,
}

/// DRAG_DROP_DATA (17): the payload of a drag that crossed machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragDropDataMessage {
    pub operation_id: Uuid,
    pub payload: ClipboardPayload,
}

/// CLIENT_EDGE_STATES (18): which edges of a client lead to another peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeStatesMessage {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl EdgeStatesMessage {
    /// Marks `edge` as leading to a neighbour.
    pub fn set(&mut self, edge: Edge) {
        match edge {
            Edge::Top => self.top = true,
            Edge::Bottom => self.bottom = true,
            Edge::Right => self.right = true,
            Edge::Left => self.left = true,
        }
    }
}

/// FILE_STREAM_READ_REQUEST (23): pull up to `read_len` bytes of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStreamReadRequestMessage {
    pub token: Uuid,
    pub file_id: Uuid,
    pub read_len: u32,
}

/// FILE_STREAM_CLOSE_REQUEST (26): release the read cursor for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStreamCloseRequestMessage {
    pub token: Uuid,
    pub file_id: Uuid,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid NetShare messages, discriminated by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareMessage {
    InitialInfo(InitialInfoMessage),
    ServerOk,
    MessagePart(MessagePartMessage),
    DisplayConfig(DisplayConfigMessage),
    ClientDeclined(ClientDeclinedMessage),
    InputData(InputData),
    ClipboardData(ClipboardDataMessage),
    EdgeHit(Edge),
    ClientActive,
    ClientInactive,
    DragDropData(DragDropDataMessage),
    ClientEdgeStates(EdgeStatesMessage),
    DragDropSuccess { operation_id: Uuid },
    DragDropCancelled { operation_id: Uuid },
    RequestFileGroupToken { operation_id: Uuid },
    FileGroupTokenResponse { token: Uuid },
    FileStreamReadRequest(FileStreamReadRequestMessage),
    FileStreamReadResponse { data: Vec<u8> },
    FileStreamReadError { reason: String },
    FileStreamCloseRequest(FileStreamCloseRequestMessage),
    CancelAnyDragDrop,
    DragDropComplete { operation_id: Uuid },
}

impl ShareMessage {
    /// Returns the [`MessageType`] tag for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ShareMessage::InitialInfo(_) => MessageType::InitialInfo,
            ShareMessage::ServerOk => MessageType::ServerOk,
            ShareMessage::MessagePart(_) => MessageType::MessagePart,
            ShareMessage::DisplayConfig(_) => MessageType::DisplayConfig,
            ShareMessage::ClientDeclined(_) => MessageType::ClientDeclined,
            ShareMessage::InputData(_) => MessageType::InputData,
            ShareMessage::ClipboardData(_) => MessageType::ClipboardData,
            ShareMessage::EdgeHit(Edge::Top) => MessageType::EdgeHitTop,
            ShareMessage::EdgeHit(Edge::Bottom) => MessageType::EdgeHitBottom,
            ShareMessage::EdgeHit(Edge::Right) => MessageType::EdgeHitRight,
            ShareMessage::EdgeHit(Edge::Left) => MessageType::EdgeHitLeft,
            ShareMessage::ClientActive => MessageType::ClientActive,
            ShareMessage::ClientInactive => MessageType::ClientInactive,
            ShareMessage::DragDropData(_) => MessageType::DragDropData,
            ShareMessage::ClientEdgeStates(_) => MessageType::ClientEdgeStates,
            ShareMessage::DragDropSuccess { .. } => MessageType::DragDropSuccess,
            ShareMessage::DragDropCancelled { .. } => MessageType::DragDropCancelled,
            ShareMessage::RequestFileGroupToken { .. } => MessageType::RequestFileGroupToken,
            ShareMessage::FileGroupTokenResponse { .. } => MessageType::FileGroupTokenResponse,
            ShareMessage::FileStreamReadRequest(_) => MessageType::FileStreamReadRequest,
            ShareMessage::FileStreamReadResponse { .. } => MessageType::FileStreamReadResponse,
            ShareMessage::FileStreamReadError { .. } => MessageType::FileStreamReadError,
            ShareMessage::FileStreamCloseRequest(_) => MessageType::FileStreamCloseRequest,
            ShareMessage::CancelAnyDragDrop => MessageType::CancelAnyDragDrop,
            ShareMessage::DragDropComplete { .. } => MessageType::DragDropComplete,
        }
    }
}

/// A message paired with the id carried in its frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: MessageId,
    pub message: ShareMessage,
}

impl Envelope {
    /// Wraps `message` under a fresh random id.
    pub fn new(message: ShareMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
        }
    }

    /// Wraps `message` as the answer to the request with id `request_id`.
    pub fn reply(request_id: MessageId, message: ShareMessage) -> Self {
        Self {
            id: request_id,
            message,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}
