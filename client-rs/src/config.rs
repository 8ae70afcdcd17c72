//! Configuration for the reelcast client

use std::time::Duration;

/// Configuration for connecting to a reelcast server
#[derive(Debug, Clone)]
pub struct ReelcastConfig {
    /// WebSocket URL (e.g., "ws://localhost:9988/ws")
    pub url: String,

    /// Session token, sent in the `x-access-token` header
    pub token: String,

    /// Timeout for the TCP connect and upgrade handshake
    pub connect_timeout: Duration,

    /// Timeout for each frame awaited from the server
    pub operation_timeout: Duration,
}

impl ReelcastConfig {
    /// Create a new configuration with the given URL and token
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}
