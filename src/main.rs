//! Reelcast CLI entry point

mod cli;

use crate::cli::{Cli, Commands, LogFormat, MediaCommands, TokenArgs, TokenCommands};
use anyhow::{Context, Result};
use clap::Parser;
use reelcast::auth::{TokenConfig, TokenError, TokenService};
use reelcast::server::{ServerConfig, StreamServer, StreamSettings};
use reelcast::storage::{
    DirectoryMediaStore, MediaStore, MemoryRevocationStore, PostgresConfig, PostgresStore,
    RevocationStore,
};
use reelcast::ObjectId;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Database config is only needed by some commands
    let db_config = || -> Result<Option<PostgresConfig>> {
        match &cli.database_url {
            Some(url) => Ok(Some(PostgresConfig::from_url(url).context("Invalid DATABASE_URL")?)),
            None => Ok(PostgresConfig::from_env()),
        }
    };

    match cli.command {
        Commands::Serve {
            ref bind,
            ref media_root,
            chunk_size,
            action_queue,
        } => {
            let bind_addr = bind.parse::<SocketAddr>().context("Invalid bind address")?;
            let config = ServerConfig {
                bind_addr,
                action_queue,
                stream: StreamSettings {
                    chunk_size,
                    store_timeout: Duration::from_secs(cli.token.store_timeout),
                },
            };
            serve(db_config()?, media_root.clone(), &cli.token, config).await
        }
        Commands::Token { ref command } => token(db_config()?, &cli.token, command).await,
        Commands::Media { ref command } => {
            let db_config = db_config()?.context("DATABASE_URL (or PGUSER and PGDATABASE) not set")?;
            media(db_config, command).await
        }
        Commands::Init => {
            let db_config = db_config()?.context("DATABASE_URL (or PGUSER and PGDATABASE) not set")?;
            init(db_config).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn token_config(args: &TokenArgs) -> Result<TokenConfig> {
    let secret = args
        .secret
        .clone()
        .context("JWT_SECRET_SALT or --jwt-secret is required")?;

    let mut config = TokenConfig::new(secret, args.issuer.clone());
    config.accepted_issuers = args
        .accepted_issuers
        .iter()
        .map(|iss| iss.trim().to_string())
        .filter(|iss| !iss.is_empty())
        .collect();
    config.algorithm = args.algorithm.clone();
    config.ttl = Duration::from_secs(args.expires_after);
    config.store_timeout = Duration::from_secs(args.store_timeout);
    Ok(config)
}

/// Revocation store: Postgres when configured, otherwise process memory
async fn revocation_store(
    db_config: Option<PostgresConfig>,
) -> Result<(Arc<dyn RevocationStore>, Option<Arc<PostgresStore>>)> {
    match db_config {
        Some(config) => {
            let store = Arc::new(PostgresStore::new(config).await?);
            let revocations: Arc<dyn RevocationStore> = store.clone();
            Ok((revocations, Some(store)))
        }
        None => {
            warn!("DATABASE_URL not set, token revocations will not survive a restart");
            let revocations: Arc<dyn RevocationStore> = Arc::new(MemoryRevocationStore::new());
            Ok((revocations, None))
        }
    }
}

async fn serve(
    db_config: Option<PostgresConfig>,
    media_root: PathBuf,
    token_args: &TokenArgs,
    config: ServerConfig,
) -> Result<()> {
    let (revocations, postgres) = revocation_store(db_config).await?;

    let media: Arc<dyn MediaStore> = match postgres {
        Some(store) => store,
        None => {
            info!(root = %media_root.display(), "Serving media from directory");
            Arc::new(DirectoryMediaStore::new(media_root))
        }
    };

    let tokens = Arc::new(TokenService::new(token_config(token_args)?, revocations)?);
    info!(algorithm = ?tokens.algorithm(), "Starting reelcast server...");
    let server = StreamServer::new(config, tokens, media);

    server.run(shutdown_signal()).await?;

    info!("Reelcast server stopped");
    Ok(())
}

async fn token(
    db_config: Option<PostgresConfig>,
    token_args: &TokenArgs,
    command: &TokenCommands,
) -> Result<()> {
    let (revocations, _) = match command {
        // Issuing never consults the revocation store
        TokenCommands::Issue { .. } => (
            Arc::new(MemoryRevocationStore::new()) as Arc<dyn RevocationStore>,
            None,
        ),
        _ => revocation_store(db_config).await?,
    };
    let tokens = TokenService::new(token_config(token_args)?, revocations)?;

    match command {
        TokenCommands::Issue { user_id } => {
            let user_id: ObjectId = user_id.parse().context("Invalid user id")?;
            println!("{}", tokens.issue(&user_id)?);
        }
        TokenCommands::Verify { token } => match tokens.verify(token).await {
            Ok(user_id) => println!("valid: user {}", user_id),
            Err(TokenError::Invalid(cause)) => {
                println!("invalid: {}", cause);
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },
        TokenCommands::Block { token, reason } => {
            tokens.block(token, reason).await?;
            println!("Blocked token ({})", reason);
        }
    }

    Ok(())
}

async fn media(db_config: PostgresConfig, command: &MediaCommands) -> Result<()> {
    let store = PostgresStore::new(db_config).await?;

    match command {
        MediaCommands::Add { owner, path, name } => {
            let owner: ObjectId = owner.parse().context("Invalid owner id")?;
            let path = tokio::fs::canonicalize(path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?;
            if !tokio::fs::metadata(&path).await?.is_file() {
                anyhow::bail!("{} is not a file", path.display());
            }
            let filepath = path
                .to_str()
                .with_context(|| format!("{} is not valid UTF-8", path.display()))?;

            let media_id = store.register_media(&owner, name.as_deref(), filepath).await?;
            info!(media_id = %media_id, owner = %owner, path = %filepath, "Registered media");
            println!("{}", media_id);
        }
    }

    Ok(())
}

async fn init(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
