//! Shared fixtures: a real server on a loopback port with media on disk

#![allow(dead_code)]

use reelcast::auth::{TokenConfig, TokenService};
use reelcast::server::{ConnectionManager, ServerConfig, StreamServer, StreamSettings};
use reelcast::storage::{DirectoryMediaStore, MemoryRevocationStore, RevocationStore};
use reelcast::ObjectId;
use reelcast_client::{ReelcastClient, ReelcastConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEST_SECRET: &[u8] = b"test-secret-for-integration-tests";
pub const CHUNK_SIZE: usize = 1024;

pub struct TestServer {
    pub addr: SocketAddr,
    pub tokens: Arc<TokenService>,
    pub connections: ConnectionManager,
    media: DirectoryMediaStore,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Arc::new(MemoryRevocationStore::new()), 1).await
    }

    pub async fn start_with(revocations: Arc<dyn RevocationStore>, action_queue: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut token_config = TokenConfig::new(TEST_SECRET, "reelcast");
        token_config.store_timeout = Duration::from_secs(2);
        let tokens = Arc::new(TokenService::new(token_config, revocations).unwrap());

        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            action_queue,
            stream: StreamSettings {
                chunk_size: CHUNK_SIZE,
                store_timeout: Duration::from_secs(2),
            },
        };
        let server = StreamServer::new(
            config,
            tokens.clone(),
            Arc::new(DirectoryMediaStore::new(dir.path())),
        );
        let connections = server.connections();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            tokens,
            connections,
            media: DirectoryMediaStore::new(dir.path()),
            shutdown: Some(shutdown_tx),
            handle,
            _dir: dir,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn token_for(&self, user: &ObjectId) -> String {
        self.tokens.issue(user).unwrap()
    }

    pub fn client(&self, token: &str) -> ReelcastClient {
        ReelcastClient::new(
            ReelcastConfig::new(self.url(), token).operation_timeout(Duration::from_secs(5)),
        )
    }

    /// Store `bytes` as a new media item owned by `owner`
    pub fn add_media(&self, owner: &ObjectId, bytes: &[u8]) -> ObjectId {
        let media_id = ObjectId::new();
        let path = self.media.path_for(&media_id, owner);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        media_id
    }

    /// Wait until the registry holds `count` connections
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections.count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} connections, have {}",
                count,
                self.connections.count()
            )
        });
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Deterministic test media of `len` bytes
pub fn media_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Send a raw HTTP request and return the full response text
pub async fn http_get(addr: SocketAddr, path: &str, headers: &[(&str, &str)]) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n", path, addr);
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
