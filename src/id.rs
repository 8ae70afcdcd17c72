//! Canonical 12-byte object identifiers
//!
//! Users and media items share one identifier format: 12 raw bytes rendered
//! as 24 lowercase hex characters, e.g. `507f191e810c19729de860ea`.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Length of the raw identifier in bytes
pub const OBJECT_ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("identifier must be {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("identifier is not valid hex: {0}")]
    InvalidHex(String),
}

/// A 12-byte identifier: 4 bytes of unix seconds, 5 random bytes, 3 counter bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

struct Generator {
    process: [u8; 5],
    counter: AtomicU32,
}

fn generator() -> &'static Generator {
    static GENERATOR: OnceLock<Generator> = OnceLock::new();
    GENERATOR.get_or_init(|| {
        let mut rng = rand::rng();
        let mut process = [0u8; 5];
        rng.fill(&mut process);
        Generator {
            process,
            counter: AtomicU32::new(rng.random::<u32>() & 0x00ff_ffff),
        }
    })
}

impl ObjectId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let gen = generator();
        let count = gen.counter.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&gen.process);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the 24-character hex form (either case)
    pub fn parse_hex(s: &str) -> Result<Self, IdError> {
        if s.len() != OBJECT_ID_LEN * 2 {
            return Err(IdError::InvalidLength {
                expected: OBJECT_ID_LEN * 2,
                got: s.len(),
            });
        }

        let mut bytes = [0u8; OBJECT_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| IdError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let id: ObjectId = "507f191e810c19729de860ea".parse().unwrap();
        assert_eq!(id.to_hex(), "507f191e810c19729de860ea");
        assert_eq!(id.to_string(), "507f191e810c19729de860ea");
    }

    #[test]
    fn test_parse_uppercase_renders_lowercase() {
        let id = ObjectId::parse_hex("507F191E810C19729DE860EA").unwrap();
        assert_eq!(id.to_hex(), "507f191e810c19729de860ea");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            ObjectId::parse_hex("507f"),
            Err(IdError::InvalidLength { expected: 24, got: 4 })
        );
        assert!(matches!(
            ObjectId::parse_hex("zz7f191e810c19729de860ea"),
            Err(IdError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert_eq!(ObjectId::parse_hex(&a.to_hex()).unwrap(), a);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = ObjectId::parse_hex("507f191e810c19729de860ea").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"507f191e810c19729de860ea\"");

        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ObjectId>("\"nope\"").is_err());
    }
}
