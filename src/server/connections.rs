//! Connection state management

use crate::id::ObjectId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// A connected, authenticated client
///
/// Immutable once created apart from the task handles registered for
/// teardown.
pub struct ClientConnection {
    /// Unique connection ID
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    /// User the session token was issued to
    pub user_id: ObjectId,
    /// Raw session token presented at upgrade, re-verified per action
    pub token: String,
    pub connected_at: Instant,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl ClientConnection {
    pub fn new(user_id: ObjectId, token: impl Into<String>, peer: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            user_id,
            token: token.into(),
            connected_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a task that must not outlive the connection
    pub fn attach(&self, handle: AbortHandle) {
        self.tasks.lock().push(handle);
    }

    /// Abort every attached task
    pub fn abort(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Manages all active connections
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Arc<ClientConnection>>>,
    /// Set by `close_all`; no connection is admitted afterwards
    closed: Arc<AtomicBool>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    ///
    /// Returns false, with the connection's tasks aborted, once `close_all`
    /// has run.
    pub fn add(&self, conn: Arc<ClientConnection>) -> bool {
        let id = conn.id;
        self.connections.insert(id, conn);

        // Re-checked after the insert so a concurrent close_all either sees
        // the entry or is seen here
        if self.closed.load(Ordering::SeqCst) {
            if let Some(conn) = self.remove(id) {
                conn.abort();
            }
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remove a connection
    pub fn remove(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Get a connection by ID
    pub fn get(&self, id: Uuid) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Tear down every connection, returning how many there were
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;

        for id in ids {
            if let Some(conn) = self.remove(id) {
                conn.abort();
                closed += 1;
            }
        }

        closed
    }
}
