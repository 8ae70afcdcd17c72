//! Message types for the reelcast protocol
//!
//! These mirror the server-side definitions to ensure protocol compatibility.

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

/// Action name for streaming a media item
pub const STREAM_BY_ID: &str = "stream_by_id";

/// Chunk frame header: magic, version, flags, seq (u64 BE), len (u32 BE)
pub const FRAME_HEADER_LEN: usize = 15;
const FRAME_MAGIC: u8 = 0x52;
const FRAME_VERSION: u8 = 0x01;
const FLAG_ERROR: u8 = 0b0000_0001;

/// A request sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientMessage {
    #[serde(rename = "do")]
    pub action: String,
    pub data: String,
}

impl ClientMessage {
    pub fn new(action: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: data.into(),
        }
    }

    /// Request a media item by its hex id
    pub fn stream_by_id(media_id: impl Into<String>) -> Self {
        Self::new(STREAM_BY_ID, media_id)
    }
}

/// Error categories reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    InvalidSession,
    SessionBlocked,
    NotFound,
    Unavailable,
    StreamFailed,
    #[serde(other)]
    Unknown,
}

/// Control messages received from the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Chunk frames for this media item follow
    StreamStarted { media_id: String },

    /// All chunks were delivered
    StreamFinished { media_id: String, chunks: u64 },

    /// A request was rejected or failed
    Error { code: ErrorCode, message: String },
}

/// A binary chunk frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub seq: u64,
    pub data: Bytes,
    /// Set on the terminal frame of a failed stream
    pub error: Option<String>,
}

impl ChunkFrame {
    /// Decode a binary frame, returning `None` if it is not a chunk frame
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < FRAME_HEADER_LEN {
            return None;
        }

        let mut header = &frame[..FRAME_HEADER_LEN];
        if header.get_u8() != FRAME_MAGIC || header.get_u8() != FRAME_VERSION {
            return None;
        }
        let flags = header.get_u8();
        let seq = header.get_u64();
        let len = header.get_u32() as usize;
        let body = &frame[FRAME_HEADER_LEN..];

        if flags & FLAG_ERROR != 0 {
            return Some(Self {
                seq,
                data: Bytes::new(),
                error: Some(String::from_utf8_lossy(body).into_owned()),
            });
        }

        if body.len() != len {
            return None;
        }

        Some(Self {
            seq,
            data: Bytes::copy_from_slice(body),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(flags: u8, seq: u64, len: u32, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![FRAME_MAGIC, FRAME_VERSION, flags];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_client_message_wire_format() {
        let json = serde_json::to_string(&ClientMessage::stream_by_id("507f191e810c19729de860ea")).unwrap();
        assert_eq!(json, r#"{"do":"stream_by_id","data":"507f191e810c19729de860ea"}"#);
    }

    #[test]
    fn test_deserialize_server_messages() {
        let started: ServerMessage =
            serde_json::from_str(r#"{"type":"stream_started","media_id":"abc"}"#).unwrap();
        assert_eq!(
            started,
            ServerMessage::StreamStarted {
                media_id: "abc".to_string()
            }
        );

        let finished: ServerMessage =
            serde_json::from_str(r#"{"type":"stream_finished","media_id":"abc","chunks":3}"#).unwrap();
        assert!(matches!(finished, ServerMessage::StreamFinished { chunks: 3, .. }));

        let error: ServerMessage = serde_json::from_str(
            r#"{"type":"error","code":"session_blocked","message":"access token has been blocked"}"#,
        )
        .unwrap();
        assert!(matches!(
            error,
            ServerMessage::Error {
                code: ErrorCode::SessionBlocked,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_error_code() {
        let error: ServerMessage =
            serde_json::from_str(r#"{"type":"error","code":"rate_limited","message":"slow down"}"#).unwrap();
        assert!(matches!(
            error,
            ServerMessage::Error {
                code: ErrorCode::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_data_frame() {
        let decoded = ChunkFrame::decode(&frame(0, 7, 3, b"abc")).unwrap();
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.data.as_ref(), b"abc");
        assert_eq!(decoded.error, None);
    }

    #[test]
    fn test_decode_error_frame() {
        let decoded = ChunkFrame::decode(&frame(FLAG_ERROR, 2, 0, b"disk gone")).unwrap();
        assert_eq!(decoded.seq, 2);
        assert_eq!(decoded.error.as_deref(), Some("disk gone"));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(ChunkFrame::decode(b"short").is_none());
        assert!(ChunkFrame::decode(&frame(0, 0, 10, b"abc")).is_none());

        let mut wrong_magic = frame(0, 0, 0, b"");
        wrong_magic[0] = 0x00;
        assert!(ChunkFrame::decode(&wrong_magic).is_none());
    }
}
