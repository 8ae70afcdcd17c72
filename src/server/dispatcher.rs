//! Action dispatcher and stream driver
//!
//! Consumes one connection's action queue in order and is the only writer to
//! that connection. Each action is authorized against the connection's
//! session token before any media is touched.

use crate::auth::{TokenError, TokenService};
use crate::id::ObjectId;
use crate::protocol::{encode_chunk, ActionKind, ErrorCode, ServerMessage};
use crate::server::listener::Action;
use crate::storage::{with_timeout, MediaStore, StorageError};
use crate::stream::{ChunkReader, DEFAULT_CHUNK_SIZE};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-stream tunables
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Bytes per chunk frame; 0 selects the default
    pub chunk_size: usize,
    /// Upper bound on each media store call
    pub store_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            store_timeout: Duration::from_secs(60),
        }
    }
}

/// What a dispatcher did over the life of its queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub actions_handled: u64,
    /// Streams that ended with `stream_finished`
    pub streams_completed: u64,
    /// Streams that started but were cut short by a read or write failure
    pub streams_failed: u64,
}

enum ActionOutcome {
    Completed,
    /// Refused before any media was sent
    Rejected,
    Failed,
}

#[derive(Clone)]
pub struct Dispatcher {
    tokens: Arc<TokenService>,
    media: Arc<dyn MediaStore>,
    settings: StreamSettings,
}

impl Dispatcher {
    pub fn new(tokens: Arc<TokenService>, media: Arc<dyn MediaStore>, settings: StreamSettings) -> Self {
        Self {
            tokens,
            media,
            settings,
        }
    }

    /// Handle actions until the queue closes
    pub async fn run<K>(&self, mut queue: mpsc::Receiver<Action>, mut sink: K) -> DispatchSummary
    where
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        let mut summary = DispatchSummary::default();

        while let Some(action) = queue.recv().await {
            summary.actions_handled += 1;
            match self.dispatch(&action, &mut sink).await {
                ActionOutcome::Completed => summary.streams_completed += 1,
                ActionOutcome::Failed => summary.streams_failed += 1,
                ActionOutcome::Rejected => {}
            }
        }

        debug!(
            actions = summary.actions_handled,
            completed = summary.streams_completed,
            failed = summary.streams_failed,
            "Action queue closed"
        );
        summary
    }

    async fn dispatch<K>(&self, action: &Action, sink: &mut K) -> ActionOutcome
    where
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        match action.kind {
            ActionKind::StreamById => self.stream_by_id(action, sink).await,
        }
    }

    async fn stream_by_id<K>(&self, action: &Action, sink: &mut K) -> ActionOutcome
    where
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        let media_id = match ObjectId::parse_hex(action.payload.trim()) {
            Ok(id) => id,
            Err(e) => {
                warn!(payload = %action.payload, error = %e, "Rejected stream request");
                return reject(sink, ErrorCode::BadRequest, format!("invalid media id: {}", e)).await;
            }
        };

        let user_id = match self.tokens.verify(&action.connection.token).await {
            Ok(user_id) => user_id,
            Err(e) => {
                let code = match &e {
                    TokenError::Invalid(_) => ErrorCode::InvalidSession,
                    TokenError::Blocked => ErrorCode::SessionBlocked,
                    TokenError::Storage(_) | TokenError::Signing(_) | TokenError::Config(_) => {
                        error!(error = %e, "Could not verify session");
                        ErrorCode::Unavailable
                    }
                };
                return reject(sink, code, e.peer_message()).await;
            }
        };

        let open = self.media.open(&media_id, &user_id);
        let reader = match with_timeout(self.settings.store_timeout, open).await {
            Ok(reader) => reader,
            Err(StorageError::NotFound(_)) => {
                debug!(media_id = %media_id, "Media not found");
                return reject(sink, ErrorCode::NotFound, "media not found").await;
            }
            Err(e) => {
                error!(media_id = %media_id, error = %e, "Failed to open media");
                return reject(sink, ErrorCode::Unavailable, "media store unavailable").await;
            }
        };

        if let Err(e) = send_json(sink, &ServerMessage::StreamStarted { media_id }).await {
            warn!(media_id = %media_id, error = %e, "Failed to start stream");
            return ActionOutcome::Failed;
        }
        info!(media_id = %media_id, user_id = %user_id, "Streaming media");

        let mut chunks = ChunkReader::new(reader, self.settings.chunk_size);
        let mut sent = 0u64;

        while let Some(chunk) = chunks.next_chunk().await {
            if let Err(e) = sink.send(Message::Binary(encode_chunk(&chunk))).await {
                warn!(media_id = %media_id, seq = chunk.seq, error = %e, "Failed to write chunk");
                return ActionOutcome::Failed;
            }

            if let Some(err) = &chunk.error {
                error!(media_id = %media_id, seq = chunk.seq, error = %err, "Media read failed");
                let failed = ServerMessage::error(ErrorCode::StreamFailed, "media read failed");
                if let Err(e) = send_json(sink, &failed).await {
                    debug!(error = %e, "Failed to report stream failure");
                }
                return ActionOutcome::Failed;
            }

            sent += 1;
        }

        let finished = ServerMessage::StreamFinished {
            media_id,
            chunks: sent,
        };
        if let Err(e) = send_json(sink, &finished).await {
            warn!(media_id = %media_id, error = %e, "Failed to finish stream");
            return ActionOutcome::Failed;
        }

        info!(media_id = %media_id, chunks = sent, "Stream finished");
        ActionOutcome::Completed
    }
}

async fn send_json<K>(sink: &mut K, msg: &ServerMessage) -> Result<(), K::Error>
where
    K: Sink<Message> + Unpin,
{
    sink.send(Message::Text(msg.to_json().into())).await
}

async fn reject<K>(sink: &mut K, code: ErrorCode, message: impl Into<String>) -> ActionOutcome
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    if let Err(e) = send_json(sink, &ServerMessage::error(code, message)).await {
        debug!(error = %e, "Failed to send rejection");
    }
    ActionOutcome::Rejected
}
