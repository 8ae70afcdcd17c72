//! Reelcast Rust Client
//!
//! A WebSocket client for the reelcast media streaming server. A session is
//! authenticated once, on the upgrade request, and then carries any number of
//! media requests.
//!
//! # Example
//!
//! ```no_run
//! use reelcast_client::{ReelcastClient, ReelcastConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReelcastConfig::new("ws://localhost:9988/ws", "your-token");
//!     let client = ReelcastClient::new(config);
//!
//!     let mut session = client.connect().await?;
//!     let media = session.stream_by_id("507f191e810c19729de860ea").await?;
//!     println!("Received {} bytes in {} chunks", media.bytes().len(), media.chunk_count());
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod messages;

pub use client::{Event, MediaStream, ReelcastClient, Session, ACCESS_TOKEN_HEADER};
pub use config::ReelcastConfig;
pub use error::{ReelcastError, Result};
pub use messages::{ChunkFrame, ClientMessage, ErrorCode, ServerMessage, STREAM_BY_ID};
