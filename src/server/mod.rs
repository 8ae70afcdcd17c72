//! Stream server implementation
//!
//! Handles WebSocket connections, decodes client actions, and streams media
//! back as chunk frames.

mod connections;
pub mod dispatcher;
pub mod listener;
pub mod websocket;

pub use connections::{ClientConnection, ConnectionManager};
pub use dispatcher::{DispatchSummary, Dispatcher, StreamSettings};
pub use listener::{Action, ActionListener, ListenOutcome};
pub use websocket::{create_router, ServerConfig, StreamServer, WsState, ACCESS_TOKEN_HEADER};
