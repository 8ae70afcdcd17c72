//! Storage backends for reelcast
//!
//! - Revocation: blocked session tokens, checked on every verification
//! - Media: resolves a media id owned by a user to a readable byte source
//!
//! Each has an in-process backend and a Postgres backend.

mod filesystem;
mod memory;
mod postgres;

pub use filesystem::DirectoryMediaStore;
pub use memory::MemoryRevocationStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::id::ObjectId;
pub use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Whether the same call may succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Database(_) | StorageError::Io(_) | StorageError::Timeout(_)
        )
    }
}

/// Bound a store call by `limit`, turning expiry into [`StorageError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StorageError::Timeout(limit))?
}

/// A blocked session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationRecord {
    /// The raw token string, as presented by clients
    pub token: String,
    pub reason: String,
    /// Owner of the token, when it could be determined
    pub user_id: Option<ObjectId>,
    /// Unix seconds
    pub blocked_at: u64,
}

impl RevocationRecord {
    pub fn new(token: impl Into<String>, reason: impl Into<String>, user_id: Option<ObjectId>) -> Self {
        let blocked_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            token: token.into(),
            reason: reason.into(),
            user_id,
            blocked_at,
        }
    }
}

/// Store of revoked session tokens
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Check whether a raw token has been revoked
    async fn has(&self, token: &str) -> Result<bool, StorageError>;

    /// Record a revocation; inserting an already-revoked token is not an error
    async fn insert(&self, record: RevocationRecord) -> Result<(), StorageError>;
}

/// Readable bytes of a media item
pub type MediaReader = Box<dyn AsyncRead + Send + Unpin>;

/// Resolves media items to their bytes
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Open the media item `media_id` belonging to `owner`
    ///
    /// Items owned by someone else are reported as [`StorageError::NotFound`].
    async fn open(&self, media_id: &ObjectId, owner: &ObjectId) -> Result<MediaReader, StorageError>;
}
