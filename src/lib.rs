//! Reelcast - media streaming over persistent WebSocket sessions
//!
//! Clients open one long-lived WebSocket with a signed session token and
//! request media by id; the server answers with the media bytes as a
//! sequence of chunk frames.

pub mod auth;
pub mod id;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod stream;

pub use auth::{TokenConfig, TokenError, TokenService};
pub use id::ObjectId;
pub use server::{ServerConfig, StreamServer};
