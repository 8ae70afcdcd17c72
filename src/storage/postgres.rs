//! PostgreSQL storage backend

use crate::id::ObjectId;
use crate::storage::{
    async_trait, MediaReader, MediaStore, RevocationRecord, RevocationStore, StorageError,
};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use std::io;
use tokio_postgres::NoTls;
use tracing::{debug, info};

const DEFAULT_POOL_SIZE: usize = 16;

/// Connection settings plus pool sizing
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection: tokio_postgres::Config,
    pub pool_size: usize,
}

impl PostgresConfig {
    /// Accepts a `postgres://` URL or a libpq `key=value` string
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        let connection: tokio_postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| StorageError::Database(e.to_string()))?;
        if connection.get_dbname().is_none() {
            return Err(StorageError::Database("connection string names no database".into()));
        }

        Ok(Self {
            connection,
            pool_size: DEFAULT_POOL_SIZE,
        })
    }

    /// Build from the libpq `PG*` variables; `None` unless PGUSER and PGDATABASE are set
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let mut connection = tokio_postgres::Config::new();
        connection
            .host(var("PGHOST").as_deref().unwrap_or("localhost"))
            .port(var("PGPORT").and_then(|p| p.parse().ok()).unwrap_or(5432))
            .user(var("PGUSER")?.as_str())
            .dbname(var("PGDATABASE")?.as_str());
        if let Some(password) = var("PGPASSWORD") {
            connection.password(password);
        }

        Some(Self {
            connection,
            pool_size: DEFAULT_POOL_SIZE,
        })
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }
}

/// Revoked tokens and media metadata in PostgreSQL
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect and make sure the schema exists
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let manager = Manager::from_config(
            config.connection,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    async fn client(&self) -> Result<Object, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let client = self.client().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS reelcast_blocked_tokens (
                    token TEXT PRIMARY KEY,
                    reason TEXT NOT NULL,
                    user_id TEXT,
                    blocked_at BIGINT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS reelcast_blocked_tokens_user_idx
                    ON reelcast_blocked_tokens(user_id);

                CREATE TABLE IF NOT EXISTS reelcast_media (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    name TEXT,
                    filepath TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS reelcast_media_user_idx ON reelcast_media(user_id);
                "#,
            )
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Register a media file for an owner, returning its new id
    pub async fn register_media(
        &self,
        owner: &ObjectId,
        name: Option<&str>,
        filepath: &str,
    ) -> Result<ObjectId, StorageError> {
        let client = self.client().await?;
        let id = ObjectId::new();

        client
            .execute(
                "INSERT INTO reelcast_media (id, user_id, name, filepath) VALUES ($1, $2, $3, $4)",
                &[&id.to_hex(), &owner.to_hex(), &name, &filepath],
            )
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!(media_id = %id, owner = %owner, "Registered media");
        Ok(id)
    }
}

#[async_trait]
impl RevocationStore for PostgresStore {
    async fn has(&self, token: &str) -> Result<bool, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM reelcast_blocked_tokens WHERE token = $1)",
                &[&token],
            )
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.get(0))
    }

    async fn insert(&self, record: RevocationRecord) -> Result<(), StorageError> {
        let client = self.client().await?;
        let user_id = record.user_id.map(|id| id.to_hex());
        let blocked_at = i64::try_from(record.blocked_at)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        client
            .execute(
                "INSERT INTO reelcast_blocked_tokens (token, reason, user_id, blocked_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (token) DO NOTHING",
                &[&record.token, &record.reason, &user_id, &blocked_at],
            )
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!(user_id = ?user_id, "Stored token revocation");
        Ok(())
    }
}

#[async_trait]
impl MediaStore for PostgresStore {
    async fn open(&self, media_id: &ObjectId, owner: &ObjectId) -> Result<MediaReader, StorageError> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT filepath FROM reelcast_media WHERE id = $1 AND user_id = $2",
                &[&media_id.to_hex(), &owner.to_hex()],
            )
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("media {}", media_id)))?;

        let filepath: String = row.get(0);
        match tokio::fs::File::open(&filepath).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(format!(
                "file for media {} is missing",
                media_id
            ))),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }
}
