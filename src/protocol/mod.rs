//! Wire protocol
//!
//! Inbound frames are JSON envelopes naming an action and carrying an opaque
//! string payload:
//!
//! ```text
//! {"do": "stream_by_id", "data": "507f191e810c19729de860ea"}
//! ```
//!
//! Outbound traffic is a mix of JSON control messages (text frames) and
//! binary chunk frames, see [`frame`].

pub mod frame;

pub use frame::{decode_chunk, encode_chunk, ChunkFrame, ErrorCode, ServerMessage};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("chunk frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("bad chunk frame magic {0:#04x}")]
    BadMagic(u8),

    #[error("unsupported chunk frame version {0}")]
    UnsupportedVersion(u8),

    #[error("chunk frame declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// A decoded inbound envelope
///
/// The action name is left as received; whether it names a supported action
/// is decided by the caller via [`ActionKind::from_wire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "do")]
    pub action: String,
    #[serde(default)]
    pub data: String,
}

impl Envelope {
    pub fn new(action: ActionKind, data: impl Into<String>) -> Self {
        Self {
            action: action.as_str().to_string(),
            data: data.into(),
        }
    }
}

/// Parse a raw inbound frame into its envelope
///
/// Only a JSON object is an envelope; arrays and scalars are rejected even
/// when their elements would line up with the envelope fields.
pub fn parse(raw: &[u8]) -> Result<Envelope, ProtocolError> {
    let object: Map<String, Value> = serde_json::from_slice(raw)?;
    Ok(serde_json::from_value(Value::Object(object))?)
}

/// The closed set of actions a connection may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Stream a media item; payload is its hex identifier
    StreamById,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[ActionKind::StreamById];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StreamById => "stream_by_id",
        }
    }

    /// Look up a supported action by its wire name
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
