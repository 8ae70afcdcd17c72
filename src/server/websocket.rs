//! WebSocket server implementation
//!
//! Clients authenticate on the upgrade request itself; once upgraded, each
//! connection gets one read loop and one dispatcher, tied together by the
//! action queue.

use crate::auth::{TokenError, TokenService};
use crate::id::ObjectId;
use crate::server::connections::{ClientConnection, ConnectionManager};
use crate::server::dispatcher::{Dispatcher, StreamSettings};
use crate::server::listener::ActionListener;
use crate::storage::MediaStore;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

/// Header carrying the session token
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub connections: ConnectionManager,
    pub tokens: Arc<TokenService>,
    pub listener: ActionListener,
    pub dispatcher: Dispatcher,
}

/// Create the WebSocket router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pick the session token from, in order, the access token header, a bearer
/// `Authorization` header, or the `token` query parameter
fn session_token(headers: &HeaderMap, query: TokenQuery) -> Option<String> {
    let from_header = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    query.token.filter(|t| !t.is_empty())
}

fn rejection(err: &TokenError) -> StatusCode {
    match err {
        TokenError::Invalid(_) => StatusCode::UNAUTHORIZED,
        TokenError::Blocked => StatusCode::FORBIDDEN,
        TokenError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        TokenError::Signing(_) | TokenError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Some(token) = session_token(&headers, query) else {
        warn!(peer = %peer, "Upgrade without session token");
        return (StatusCode::UNAUTHORIZED, "missing access token").into_response();
    };

    let user_id = match state.tokens.verify(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Upgrade refused");
            return (rejection(&e), e.peer_message()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, token, peer))
}

async fn handle_socket(
    socket: WebSocket,
    state: WsState,
    user_id: ObjectId,
    token: String,
    peer: SocketAddr,
) {
    let conn = Arc::new(ClientConnection::new(user_id, token, Some(peer)));
    let conn_id = conn.id;
    let span = info_span!("connection", conn_id = %conn_id, user_id = %user_id);

    let (sink, stream) = socket.split();
    let (queue, reader) = span.in_scope(|| state.listener.listen(conn.clone(), stream));

    let dispatcher = state.dispatcher.clone();
    let writer = tokio::spawn(async move { dispatcher.run(queue, sink).await }.instrument(span.clone()));

    conn.attach(reader.abort_handle());
    conn.attach(writer.abort_handle());
    let connected_at = conn.connected_at;

    async {
        // close_all may already have run; the connection is then torn down here
        if state.connections.add(conn) {
            info!(peer = %peer, "Client connected");
        } else {
            info!(peer = %peer, "Server shutting down, dropping connection");
        }

        match reader.await {
            Ok(outcome) => info!(outcome = ?outcome, "Read loop ended"),
            Err(e) if e.is_cancelled() => info!("Connection torn down"),
            Err(e) => error!(error = %e, "Read loop panicked"),
        }

        match writer.await {
            Ok(summary) => info!(
                actions = summary.actions_handled,
                completed = summary.streams_completed,
                failed = summary.streams_failed,
                duration = ?connected_at.elapsed(),
                "Client disconnected"
            ),
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "Dispatcher panicked"),
        }

        state.connections.remove(conn_id);
    }
    .instrument(span)
    .await
}

/// Stream server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Actions buffered per connection before reading pauses
    pub action_queue: usize,
    pub stream: StreamSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9988)),
            action_queue: 1,
            stream: StreamSettings::default(),
        }
    }
}

/// The media streaming server
pub struct StreamServer {
    config: ServerConfig,
    state: WsState,
}

impl StreamServer {
    pub fn new(config: ServerConfig, tokens: Arc<TokenService>, media: Arc<dyn MediaStore>) -> Self {
        let state = WsState {
            connections: ConnectionManager::new(),
            dispatcher: Dispatcher::new(tokens.clone(), media, config.stream),
            listener: ActionListener::new(config.action_queue),
            tokens,
        };

        Self { config, state }
    }

    /// Live connection registry
    pub fn connections(&self) -> ConnectionManager {
        self.state.connections.clone()
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// tear down every live connection
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Stream server listening");

        let connections = self.state.connections.clone();
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        let closed = connections.close_all();
        info!(connections = closed, "Stream server stopped");
        Ok(())
    }
}
