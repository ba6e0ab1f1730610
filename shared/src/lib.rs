//! Wire protocol shared between the drawing-board server and its clients.
//!
//! Everything on the wire is a [`Frame`]: a 24-byte little-endian header
//! followed by a body of at most [`MAX_BODY_SIZE`] bytes. Payloads larger
//! than one frame are split into chunks that share a correlation id and are
//! reassembled by the receiver. This crate is pure data: it never touches a
//! socket.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Total size of one frame on the wire, header included.
pub const FRAME_SIZE: usize = 128;
/// Fixed header: action code (4) + chunk index (4) + chunk count (4)
/// + correlation id (8) + body length (4).
pub const HEADER_SIZE: usize = 24;
/// Largest body a single frame can carry.
pub const MAX_BODY_SIZE: usize = FRAME_SIZE - HEADER_SIZE;

/// Username and password fields are zero-padded to this size.
pub const MAX_CREDENTIAL_SIZE: usize = 16;
/// Login/register body: username field followed by password field.
pub const CREDENTIALS_SIZE: usize = MAX_CREDENTIAL_SIZE * 2;
/// Board titles are capped at this many bytes on the wire.
pub const MAX_BOARD_TITLE_SIZE: usize = 16;

/// Wire-level command selector carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ActionCode {
    Error = 0,
    LogIn = 1,
    Register = 2,
    Shutdown = 3,
    CreateBoard = 4,
    GetBoard = 5,
    GetBoards = 6,
    DeleteBoard = 7,
    PointsSet = 8,
    Line = 9,
    Text = 10,
    Image = 11,
    Undo = 12,
    Clear = 13,
    SelectBoard = 14,
    GetBoardElements = 15,
}

impl ActionCode {
    /// Maps a raw header value back to an action code. Unknown values are
    /// not a framing error; the router simply ignores such frames.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Error),
            1 => Some(Self::LogIn),
            2 => Some(Self::Register),
            3 => Some(Self::Shutdown),
            4 => Some(Self::CreateBoard),
            5 => Some(Self::GetBoard),
            6 => Some(Self::GetBoards),
            7 => Some(Self::DeleteBoard),
            8 => Some(Self::PointsSet),
            9 => Some(Self::Line),
            10 => Some(Self::Text),
            11 => Some(Self::Image),
            12 => Some(Self::Undo),
            13 => Some(Self::Clear),
            14 => Some(Self::SelectBoard),
            15 => Some(Self::GetBoardElements),
            _ => None,
        }
    }
}

/// Errors raised while decoding bytes into a frame. All of them are fatal
/// to the connection that produced the bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared body length {0} exceeds the {MAX_BODY_SIZE}-byte limit")]
    BodyTooLarge(i32),
    #[error("declared body length {0} is negative")]
    NegativeBodyLength(i32),
    #[error("chunk index {index} is outside chunk count {count}")]
    InvalidChunk { index: i32, count: i32 },
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Decoded frame header, before the body has been read off the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flag: i32,
    pub chunk_index: i32,
    pub chunk_count: i32,
    pub correlation_id: i64,
    pub body_len: usize,
}

impl FrameHeader {
    /// Decodes the fixed 24-byte header. Validates the body length and the
    /// chunk invariants; the action code itself is left raw so unknown
    /// commands can be skipped rather than killing the connection.
    pub fn decode(head: &[u8; HEADER_SIZE]) -> Result<Self, FrameError> {
        let flag = i32::from_le_bytes(head[0..4].try_into().unwrap());
        let chunk_index = i32::from_le_bytes(head[4..8].try_into().unwrap());
        let chunk_count = i32::from_le_bytes(head[8..12].try_into().unwrap());
        let correlation_id = i64::from_le_bytes(head[12..20].try_into().unwrap());
        let body_len = i32::from_le_bytes(head[20..24].try_into().unwrap());

        if body_len < 0 {
            return Err(FrameError::NegativeBodyLength(body_len));
        }
        if body_len as usize > MAX_BODY_SIZE {
            return Err(FrameError::BodyTooLarge(body_len));
        }
        if chunk_count < 1 || chunk_index < 0 || chunk_index >= chunk_count {
            return Err(FrameError::InvalidChunk {
                index: chunk_index,
                count: chunk_count,
            });
        }

        Ok(Self {
            flag,
            chunk_index,
            chunk_count,
            correlation_id,
            body_len: body_len as usize,
        })
    }
}

/// One wire-protocol unit: fixed header plus bounded body.
///
/// Invariants: `0 <= chunk_index < chunk_count`, `chunk_count >= 1` even
/// for single-frame messages, `body.len() <= MAX_BODY_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw action code; see [`Frame::action`].
    pub flag: i32,
    pub chunk_index: i32,
    pub chunk_count: i32,
    /// Groups the chunks of one logical message from one connection.
    /// A millisecond timestamp by convention; not globally unique.
    pub correlation_id: i64,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(
        action: ActionCode,
        chunk_index: i32,
        chunk_count: i32,
        correlation_id: i64,
        body: Vec<u8>,
    ) -> Self {
        debug_assert!(body.len() <= MAX_BODY_SIZE);
        debug_assert!(chunk_count >= 1 && chunk_index >= 0 && chunk_index < chunk_count);
        Self {
            flag: action as i32,
            chunk_index,
            chunk_count,
            correlation_id,
            body,
        }
    }

    /// Builds a self-contained single-chunk message (index 0, count 1).
    pub fn single(action: ActionCode, correlation_id: i64, body: Vec<u8>) -> Self {
        Self::new(action, 0, 1, correlation_id, body)
    }

    /// The action code, if the raw flag value is a recognized command.
    pub fn action(&self) -> Option<ActionCode> {
        ActionCode::from_i32(self.flag)
    }

    /// Whether this is the final chunk of its logical message.
    pub fn is_last_chunk(&self) -> bool {
        self.chunk_index == self.chunk_count - 1
    }

    /// Serializes header and body into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.body.len());
        bytes.extend_from_slice(&self.flag.to_le_bytes());
        bytes.extend_from_slice(&self.chunk_index.to_le_bytes());
        bytes.extend_from_slice(&self.chunk_count.to_le_bytes());
        bytes.extend_from_slice(&self.correlation_id.to_le_bytes());
        bytes.extend_from_slice(&(self.body.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Inverse of [`Frame::encode`] for a complete frame held in memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let head: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
        let header = FrameHeader::decode(&head)?;

        let expected = HEADER_SIZE + header.body_len;
        if bytes.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            flag: header.flag,
            chunk_index: header.chunk_index,
            chunk_count: header.chunk_count,
            correlation_id: header.correlation_id,
            body: bytes[HEADER_SIZE..expected].to_vec(),
        })
    }
}

/// Splits an arbitrary payload into ordered chunks sharing one correlation
/// id, with `chunk_count = ceil(len / MAX_BODY_SIZE)`. A zero-length
/// payload produces no frames.
pub fn split_message(action: ActionCode, correlation_id: i64, payload: &[u8]) -> Vec<Frame> {
    if payload.is_empty() {
        return Vec::new();
    }

    let chunk_count = payload.len().div_ceil(MAX_BODY_SIZE) as i32;
    payload
        .chunks(MAX_BODY_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            Frame::new(
                action,
                index as i32,
                chunk_count,
                correlation_id,
                chunk.to_vec(),
            )
        })
        .collect()
}

/// Milliseconds since the Unix epoch; the conventional correlation id.
pub fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

/// An account as the storage layer hands it to the server. Credentials are
/// fixed-size zero-padded buffers end to end; see [`pad_credential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: [u8; MAX_CREDENTIAL_SIZE],
    pub password: [u8; MAX_CREDENTIAL_SIZE],
    pub is_admin: bool,
}

/// A named drawing board owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: i32,
    pub color: i32,
    /// At most [`MAX_BOARD_TITLE_SIZE`] bytes.
    pub title: Vec<u8>,
}

/// Kind of drawing element stored on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ElementType {
    PointsSet = 0,
    Line = 1,
    Text = 2,
    Image = 3,
}

impl ElementType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::PointsSet),
            1 => Some(Self::Line),
            2 => Some(Self::Text),
            3 => Some(Self::Image),
            _ => None,
        }
    }

    /// The drawing action codes map one-to-one onto element types.
    pub fn from_action(action: ActionCode) -> Option<Self> {
        match action {
            ActionCode::PointsSet => Some(Self::PointsSet),
            ActionCode::Line => Some(Self::Line),
            ActionCode::Text => Some(Self::Text),
            ActionCode::Image => Some(Self::Image),
            _ => None,
        }
    }
}

/// One drawing element: opaque payload tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub kind: ElementType,
    pub bytes: Vec<u8>,
}

/// Zero-pads a username or password to its fixed wire size. Returns `None`
/// when the input is too long.
pub fn pad_credential(raw: &[u8]) -> Option<[u8; MAX_CREDENTIAL_SIZE]> {
    if raw.len() > MAX_CREDENTIAL_SIZE {
        return None;
    }
    let mut padded = [0u8; MAX_CREDENTIAL_SIZE];
    padded[..raw.len()].copy_from_slice(raw);
    Some(padded)
}

/// Builds a login/register body: username field then password field.
pub fn encode_credentials(username: &[u8], password: &[u8]) -> Option<[u8; CREDENTIALS_SIZE]> {
    let username = pad_credential(username)?;
    let password = pad_credential(password)?;
    let mut body = [0u8; CREDENTIALS_SIZE];
    body[..MAX_CREDENTIAL_SIZE].copy_from_slice(&username);
    body[MAX_CREDENTIAL_SIZE..].copy_from_slice(&password);
    Some(body)
}

/// Splits a login/register body back into its username and password
/// fields. Returns `None` unless the body is exactly the fixed size.
pub fn decode_credentials(
    body: &[u8],
) -> Option<([u8; MAX_CREDENTIAL_SIZE], [u8; MAX_CREDENTIAL_SIZE])> {
    if body.len() != CREDENTIALS_SIZE {
        return None;
    }
    let username = body[..MAX_CREDENTIAL_SIZE].try_into().unwrap();
    let password = body[MAX_CREDENTIAL_SIZE..].try_into().unwrap();
    Some((username, password))
}

/// Board wire encoding: id + color + title length + title bytes.
pub fn encode_board(board: &Board) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(12 + board.title.len());
    bytes.extend_from_slice(&board.id.to_le_bytes());
    bytes.extend_from_slice(&board.color.to_le_bytes());
    bytes.extend_from_slice(&(board.title.len() as i32).to_le_bytes());
    bytes.extend_from_slice(&board.title);
    bytes
}

/// Inverse of [`encode_board`]. Rejects oversized or inconsistent titles.
pub fn decode_board(bytes: &[u8]) -> Option<Board> {
    if bytes.len() < 12 {
        return None;
    }
    let id = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let color = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let title_len = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
    if title_len < 0 || title_len as usize > MAX_BOARD_TITLE_SIZE {
        return None;
    }
    if bytes.len() != 12 + title_len as usize {
        return None;
    }
    Some(Board {
        id,
        color,
        title: bytes[12..].to_vec(),
    })
}

/// Element replay encoding: element type + payload bytes.
pub fn encode_element(element: &Element) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + element.bytes.len());
    bytes.extend_from_slice(&(element.kind as i32).to_le_bytes());
    bytes.extend_from_slice(&element.bytes);
    bytes
}

/// Inverse of [`encode_element`].
pub fn decode_element(bytes: &[u8]) -> Option<Element> {
    if bytes.len() < 4 {
        return None;
    }
    let kind = ElementType::from_i32(i32::from_le_bytes(bytes[0..4].try_into().unwrap()))?;
    Some(Element {
        kind,
        bytes: bytes[4..].to_vec(),
    })
}
