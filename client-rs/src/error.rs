//! Error types for the reelcast client

use crate::messages::ErrorCode;
use thiserror::Error;

/// Errors that can occur when using the reelcast client
#[derive(Error, Debug)]
pub enum ReelcastError {
    /// Connection to the server failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server refused the upgrade request
    #[error("Upgrade rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Server reported an error for a request
    #[error("Server error ({code:?}): {message}")]
    Server { code: ErrorCode, message: String },

    /// The media source failed mid-stream
    #[error("Stream failed at chunk {seq}: {message}")]
    StreamFailed { seq: u64, message: String },

    /// Failed to serialize/deserialize message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server sent something the client cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// WebSocket error
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server closed the connection
    #[error("Connection closed{}", .code.map(|c| format!(" with code {}", c)).unwrap_or_default())]
    Closed { code: Option<u16> },
}

impl ReelcastError {
    /// The server's error code, for rejected requests
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ReelcastError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for reelcast client operations
pub type Result<T> = std::result::Result<T, ReelcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_rejected() {
        let err = ReelcastError::Rejected {
            status: 401,
            message: "access token is invalid".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upgrade rejected with status 401: access token is invalid"
        );
    }

    #[test]
    fn test_error_display_closed() {
        assert_eq!(ReelcastError::Closed { code: None }.to_string(), "Connection closed");
        assert_eq!(
            ReelcastError::Closed { code: Some(1001) }.to_string(),
            "Connection closed with code 1001"
        );
    }

    #[test]
    fn test_error_code() {
        let err = ReelcastError::Server {
            code: ErrorCode::NotFound,
            message: "media not found".to_string(),
        };
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert_eq!(ReelcastError::Timeout.code(), None);
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: ReelcastError = json_err.into();
        assert!(matches!(err, ReelcastError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
