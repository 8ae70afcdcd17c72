//! Outbound frames
//!
//! Chunks travel as binary frames with a fixed 15-byte header:
//!
//! ```text
//! +-------+-------+-------+--------------+--------------+--------+
//! | magic | ver   | flags | seq (u64 BE) | len (u32 BE) | body   |
//! | 0x52  | 0x01  |       |              |              |        |
//! +-------+-------+-------+--------------+--------------+--------+
//! ```
//!
//! Without [`FLAG_ERROR`] the body is exactly `len` media bytes. With it the
//! body is the UTF-8 error message, `len` is 0, and the stream is over.
//!
//! Everything else the server says is a JSON [`ServerMessage`] text frame.

use crate::id::ObjectId;
use crate::protocol::ProtocolError;
use crate::stream::Chunk;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const MAGIC: u8 = 0x52;
pub const VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = 15;

/// Terminal error chunk
pub const FLAG_ERROR: u8 = 0b0000_0001;

/// Encode a chunk as a binary frame
pub fn encode_chunk(chunk: &Chunk) -> Bytes {
    match &chunk.error {
        Some(err) => {
            let message = err.message.as_bytes();
            let mut buf = BytesMut::with_capacity(HEADER_LEN + message.len());
            put_header(&mut buf, FLAG_ERROR, chunk.seq, 0);
            buf.put_slice(message);
            buf.freeze()
        }
        None => {
            // ChunkReader caps chunks at MAX_CHUNK_SIZE, which fits the u32 length field
            let payload = chunk.payload();
            let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
            put_header(&mut buf, 0, chunk.seq, payload.len() as u32);
            buf.put_slice(payload);
            buf.freeze()
        }
    }
}

fn put_header(buf: &mut BytesMut, flags: u8, seq: u64, len: u32) {
    buf.put_u8(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(flags);
    buf.put_u64(seq);
    buf.put_u32(len);
}

/// A chunk frame as seen by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub seq: u64,
    pub data: Bytes,
    pub error: Option<String>,
}

impl ChunkFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decode a binary chunk frame
pub fn decode_chunk(frame: &[u8]) -> Result<ChunkFrame, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::FrameTooShort(frame.len()));
    }

    let mut header = &frame[..HEADER_LEN];
    let magic = header.get_u8();
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let version = header.get_u8();
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let flags = header.get_u8();
    let seq = header.get_u64();
    let len = header.get_u32() as usize;
    let body = &frame[HEADER_LEN..];

    if flags & FLAG_ERROR != 0 {
        return Ok(ChunkFrame {
            seq,
            data: Bytes::new(),
            error: Some(String::from_utf8_lossy(body).into_owned()),
        });
    }

    if body.len() != len {
        return Err(ProtocolError::LengthMismatch {
            declared: len,
            actual: body.len(),
        });
    }

    Ok(ChunkFrame {
        seq,
        data: Bytes::copy_from_slice(body),
        error: None,
    })
}

/// Error categories reported to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    InvalidSession,
    SessionBlocked,
    NotFound,
    Unavailable,
    StreamFailed,
}

/// Control messages from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Chunk frames for this media item follow
    StreamStarted { media_id: ObjectId },
    /// All chunks were delivered
    StreamFinished { media_id: ObjectId, chunks: u64 },
    /// An action was rejected or failed
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only plain strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
