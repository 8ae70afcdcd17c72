//! Reelcast client implementation

use crate::config::ReelcastConfig;
use crate::error::{ReelcastError, Result};
use crate::messages::{ChunkFrame, ClientMessage, ServerMessage};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Header carrying the session token on the upgrade request
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Something received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Control(ServerMessage),
    Chunk(ChunkFrame),
    /// The server closed the connection
    Closed(Option<u16>),
}

/// A media item received in full
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub media_id: String,
    pub chunks: Vec<ChunkFrame>,
}

impl MediaStream {
    /// The media bytes, in sequence order
    pub fn bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.chunks.iter().map(|c| c.data.len()).sum());
        for chunk in &self.chunks {
            buf.extend_from_slice(&chunk.data);
        }
        buf.freeze()
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }
}

/// Reelcast WebSocket client
#[derive(Debug, Clone)]
pub struct ReelcastClient {
    config: ReelcastConfig,
}

impl ReelcastClient {
    /// Create a new client with the given configuration
    pub fn new(config: ReelcastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReelcastConfig {
        &self.config
    }

    /// Open a session; the token is checked before the upgrade completes
    pub async fn connect(&self) -> Result<Session> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ReelcastError::Connection(e.to_string()))?;

        let token = HeaderValue::from_str(&self.config.token)
            .map_err(|e| ReelcastError::Connection(format!("invalid token header: {}", e)))?;
        request.headers_mut().insert(ACCESS_TOKEN_HEADER, token);

        let (ws, _) = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ReelcastError::Timeout)?
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    let message = response
                        .body()
                        .as_ref()
                        .map(|body| String::from_utf8_lossy(body).into_owned())
                        .unwrap_or_default();
                    ReelcastError::Rejected {
                        status: response.status().as_u16(),
                        message,
                    }
                }
                other => ReelcastError::Connection(other.to_string()),
            })?;

        debug!(url = %self.config.url, "Connected");
        Ok(Session {
            ws,
            config: self.config.clone(),
        })
    }
}

/// An open connection to the server
pub struct Session {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: ReelcastConfig,
}

impl Session {
    /// Send an action without waiting for its outcome
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.send_text(text).await
    }

    /// Send an arbitrary text frame
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.ws
            .send(Message::Text(text.into().into()))
            .await
            .map_err(|e| ReelcastError::Transport(e.to_string()))
    }

    /// Wait for the next control message or chunk
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            let next = timeout(self.config.operation_timeout, self.ws.next())
                .await
                .map_err(|_| ReelcastError::Timeout)?;

            match next {
                Some(Ok(Message::Text(text))) => {
                    let msg: ServerMessage = serde_json::from_str(text.as_str())?;
                    return Ok(Event::Control(msg));
                }
                Some(Ok(Message::Binary(data))) => {
                    let frame = ChunkFrame::decode(&data)
                        .ok_or_else(|| ReelcastError::Protocol("malformed chunk frame".into()))?;
                    return Ok(Event::Chunk(frame));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Event::Closed(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return Ok(Event::Closed(None));
                }
                Some(Err(e)) => return Err(ReelcastError::Transport(e.to_string())),
            }
        }
    }

    /// Request a media item and collect every chunk of it
    pub async fn stream_by_id(&mut self, media_id: &str) -> Result<MediaStream> {
        self.send(&ClientMessage::stream_by_id(media_id)).await?;
        self.receive_stream().await
    }

    /// Collect the response to a stream request already sent
    pub async fn receive_stream(&mut self) -> Result<MediaStream> {
        let media_id = match self.next_event().await? {
            Event::Control(ServerMessage::StreamStarted { media_id }) => media_id,
            other => return Err(unexpected(other)),
        };

        let mut chunks: Vec<ChunkFrame> = Vec::new();
        loop {
            match self.next_event().await? {
                Event::Chunk(frame) => {
                    if frame.seq != chunks.len() as u64 {
                        return Err(ReelcastError::Protocol(format!(
                            "expected chunk {}, got {}",
                            chunks.len(),
                            frame.seq
                        )));
                    }
                    if let Some(message) = frame.error {
                        // The server follows an error frame with a stream_failed message
                        if let Ok(Event::Control(msg)) = self.next_event().await {
                            debug!(msg = ?msg, "Stream failure reported");
                        }
                        return Err(ReelcastError::StreamFailed {
                            seq: frame.seq,
                            message,
                        });
                    }
                    chunks.push(frame);
                }
                Event::Control(ServerMessage::StreamFinished { chunks: count, .. }) => {
                    if count != chunks.len() as u64 {
                        warn!(expected = count, received = chunks.len(), "Chunk count mismatch");
                        return Err(ReelcastError::Protocol(format!(
                            "server sent {} chunks but reported {}",
                            chunks.len(),
                            count
                        )));
                    }
                    return Ok(MediaStream { media_id, chunks });
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    /// Close the session with a normal close code
    pub async fn close(mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| ReelcastError::Transport(e.to_string()))
    }

    /// Close the session with an arbitrary close code
    pub async fn close_with(mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.ws
            .close(Some(frame))
            .await
            .map_err(|e| ReelcastError::Transport(e.to_string()))
    }
}

fn unexpected(event: Event) -> ReelcastError {
    match event {
        Event::Control(ServerMessage::Error { code, message }) => ReelcastError::Server { code, message },
        Event::Closed(code) => ReelcastError::Closed { code },
        other => ReelcastError::Protocol(format!("unexpected {:?}", other)),
    }
}
