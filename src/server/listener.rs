//! Per-connection read loop
//!
//! Decodes inbound frames into [`Action`]s and hands them to a bounded queue.
//! The loop blocks while the queue is full, so a slow consumer throttles
//! reading from the peer.

use crate::protocol::{self, ActionKind};
use crate::server::connections::ClientConnection;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// A decoded request to run on a connection
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    /// Opaque payload, interpreted per kind
    pub payload: String,
    pub connection: Arc<ClientConnection>,
}

/// Why a read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// Peer closed normally or went away
    Closed,
    /// Abnormal close code or transport error
    Failed(String),
    /// An inbound frame could not be decoded
    ProtocolViolation(String),
    /// The action consumer dropped its end of the queue
    ConsumerGone,
}

/// Spawns read loops with a fixed queue capacity
#[derive(Debug, Clone, Copy)]
pub struct ActionListener {
    capacity: usize,
}

impl Default for ActionListener {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ActionListener {
    /// A `capacity` of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start reading `stream` for `conn`
    ///
    /// Returns the action queue and the loop's handle. The queue closes when
    /// the loop ends, whatever the reason.
    pub fn listen<S, E>(
        &self,
        conn: Arc<ClientConnection>,
        stream: S,
    ) -> (mpsc::Receiver<Action>, JoinHandle<ListenOutcome>)
    where
        S: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.capacity);
        let handle = tokio::spawn(read_loop(conn, stream, tx).in_current_span());
        (rx, handle)
    }
}

async fn read_loop<S, E>(
    conn: Arc<ClientConnection>,
    mut stream: S,
    tx: mpsc::Sender<Action>,
) -> ListenOutcome
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) | Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                continue;
            }
            Some(Ok(Message::Close(frame))) => return closed(frame),
            Some(Err(e)) => {
                error!(error = %e, "Failed to read from connection");
                return ListenOutcome::Failed(e.to_string());
            }
            None => {
                info!("Connection stream ended");
                return ListenOutcome::Closed;
            }
        };

        let envelope = match protocol::parse(text.as_str().as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Failed to decode inbound frame");
                return ListenOutcome::ProtocolViolation(e.to_string());
            }
        };

        let Some(kind) = ActionKind::from_wire(&envelope.action) else {
            error!(action = %envelope.action, "Unsupported action");
            continue;
        };

        debug!(action = %kind, "Queueing action");
        let action = Action {
            kind,
            payload: envelope.data,
            connection: conn.clone(),
        };

        if tx.send(action).await.is_err() {
            debug!("Action consumer is gone");
            return ListenOutcome::ConsumerGone;
        }
    }
}

fn closed(frame: Option<CloseFrame>) -> ListenOutcome {
    match frame {
        None => {
            info!("Connection closed");
            ListenOutcome::Closed
        }
        Some(frame) if frame.code == close_code::NORMAL || frame.code == close_code::AWAY => {
            info!(code = frame.code, reason = %frame.reason.as_str(), "Connection closed");
            ListenOutcome::Closed
        }
        Some(frame) => {
            error!(code = frame.code, reason = %frame.reason.as_str(), "Connection closed abnormally");
            ListenOutcome::Failed(format!("close code {}", frame.code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObjectId;
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;
    use std::time::Duration;

    type Inbound = Result<Message, String>;

    fn conn() -> Arc<ClientConnection> {
        Arc::new(ClientConnection::new(ObjectId::new(), "tok", None))
    }

    fn text(s: &str) -> Inbound {
        Ok(Message::Text(s.to_string().into()))
    }

    fn stream_by_id(data: &str) -> Inbound {
        text(&format!(r#"{{"do":"stream_by_id","data":"{}"}}"#, data))
    }

    fn close(code: u16) -> Inbound {
        Ok(Message::Close(Some(CloseFrame {
            code,
            reason: "bye".into(),
        })))
    }

    async fn drain(mut rx: mpsc::Receiver<Action>) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(action) = rx.recv().await {
            payloads.push(action.payload);
        }
        payloads
    }

    #[tokio::test]
    async fn test_actions_in_order_then_normal_close() {
        let frames = futures::stream::iter(vec![
            stream_by_id("a"),
            stream_by_id("b"),
            stream_by_id("c"),
            close(close_code::NORMAL),
        ]);

        let (rx, handle) = ActionListener::new(1).listen(conn(), frames);
        assert_eq!(drain(rx).await, vec!["a", "b", "c"]);
        assert_eq!(handle.await.unwrap(), ListenOutcome::Closed);
    }

    #[tokio::test]
    async fn test_unsupported_action_is_skipped() {
        let frames = futures::stream::iter(vec![
            text(r#"{"do":"nope","data":"x"}"#),
            stream_by_id("a"),
        ]);

        let (rx, handle) = ActionListener::default().listen(conn(), frames);
        assert_eq!(drain(rx).await, vec!["a"]);
        assert_eq!(handle.await.unwrap(), ListenOutcome::Closed);
    }

    #[tokio::test]
    async fn test_malformed_frame_terminates() {
        let frames = futures::stream::iter(vec![
            stream_by_id("a"),
            text("{not json"),
            stream_by_id("never"),
        ]);

        let (rx, handle) = ActionListener::new(4).listen(conn(), frames);
        assert_eq!(drain(rx).await, vec!["a"]);
        assert!(matches!(
            handle.await.unwrap(),
            ListenOutcome::ProtocolViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_close_codes() {
        for (code, expected_closed) in [
            (close_code::NORMAL, true),
            (close_code::AWAY, true),
            (close_code::ERROR, false),
            (close_code::POLICY, false),
        ] {
            let frames = futures::stream::iter(vec![close(code)]);
            let (rx, handle) = ActionListener::new(1).listen(conn(), frames);
            drop(rx);
            let outcome = handle.await.unwrap();
            assert_eq!(outcome == ListenOutcome::Closed, expected_closed, "code {code}");
        }

        let frames = futures::stream::iter(vec![Ok::<_, String>(Message::Close(None))]);
        let (_rx, handle) = ActionListener::new(1).listen(conn(), frames);
        assert_eq!(handle.await.unwrap(), ListenOutcome::Closed);
    }

    #[tokio::test]
    async fn test_read_error_fails() {
        let frames = futures::stream::iter(vec![stream_by_id("a"), Err("reset by peer".to_string())]);

        let (rx, handle) = ActionListener::new(2).listen(conn(), frames);
        assert_eq!(drain(rx).await, vec!["a"]);
        assert_eq!(
            handle.await.unwrap(),
            ListenOutcome::Failed("reset by peer".to_string())
        );
    }

    #[tokio::test]
    async fn test_non_text_frames_ignored() {
        let frames = futures::stream::iter(vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(Bytes::new())),
            Ok(Message::Pong(Bytes::new())),
            stream_by_id("a"),
        ]);

        let (rx, handle) = ActionListener::new(1).listen(conn(), frames);
        assert_eq!(drain(rx).await, vec!["a"]);
        assert_eq!(handle.await.unwrap(), ListenOutcome::Closed);
    }

    #[tokio::test]
    async fn test_consumer_gone_stops_reading() {
        let (frame_tx, frame_rx) = fmpsc::unbounded::<Inbound>();
        frame_tx.unbounded_send(stream_by_id("a")).unwrap();

        let (rx, handle) = ActionListener::new(1).listen(conn(), frame_rx);
        drop(rx);
        frame_tx.unbounded_send(stream_by_id("b")).unwrap();

        assert_eq!(handle.await.unwrap(), ListenOutcome::ConsumerGone);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_reader() {
        use futures::StreamExt;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let frames = futures::stream::iter(vec![stream_by_id("a"), stream_by_id("b"), stream_by_id("c")])
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let (mut rx, handle) = ActionListener::new(1).listen(conn(), frames);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // "a" fills the queue and the send of "b" is parked; "c" stays unread
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());

        assert_eq!(rx.recv().await.unwrap().payload, "a");
        assert_eq!(rx.recv().await.unwrap().payload, "b");
        assert_eq!(rx.recv().await.unwrap().payload, "c");
        assert_eq!(pulled.load(Ordering::SeqCst), 3);

        assert!(rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), ListenOutcome::Closed);
    }

    #[tokio::test]
    async fn test_array_frame_terminates() {
        let frames = futures::stream::iter(vec![
            text(r#"["stream_by_id","507f191e810c19729de860ea"]"#),
            stream_by_id("never"),
        ]);

        let (rx, handle) = ActionListener::new(4).listen(conn(), frames);
        assert!(drain(rx).await.is_empty());
        assert!(matches!(
            handle.await.unwrap(),
            ListenOutcome::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        assert_eq!(ActionListener::new(0).capacity(), 1);
        assert_eq!(ActionListener::default().capacity(), 1);
    }
}
