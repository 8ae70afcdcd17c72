//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use reelcast::stream::MAX_CHUNK_SIZE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelcast")]
#[command(about = "Media streaming over persistent WebSocket sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL; without it, revocations are kept in memory
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Log output format
    #[arg(long, env = "REELCAST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub token: TokenArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Session token settings shared by every command
#[derive(clap::Args, Debug, Clone)]
pub struct TokenArgs {
    /// Token signing secret
    #[arg(long = "jwt-secret", env = "JWT_SECRET_SALT", global = true, hide_env_values = true)]
    pub secret: Option<String>,

    /// Issuer written into new tokens
    #[arg(long = "jwt-issuer", env = "JWT_TOKEN_ISSUER", default_value = "reelcast", global = true)]
    pub issuer: String,

    /// Further issuers to accept, comma separated
    #[arg(
        long = "jwt-accepted-issuers",
        env = "JWT_TOKEN_ACCEPTED_ISSUERS",
        value_delimiter = ',',
        global = true
    )]
    pub accepted_issuers: Vec<String>,

    /// Signing algorithm
    #[arg(long = "jwt-algorithm", env = "JWT_TOKEN_ENCRYPT_ALGO", default_value = "HS256", global = true)]
    pub algorithm: String,

    /// Token lifetime in seconds
    #[arg(long = "jwt-expires-after", env = "JWT_TOKEN_EXPIRES_AFTER", default_value_t = 3600, global = true)]
    pub expires_after: u64,

    /// Seconds to wait on the revocation and media stores
    #[arg(long, env = "REELCAST_STORE_TIMEOUT", default_value_t = 60, global = true)]
    pub store_timeout: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the stream server
    Serve {
        /// Address to bind to
        #[arg(short, long, env = "REELCAST_BIND", default_value = "0.0.0.0:9988")]
        bind: String,

        /// Directory holding media as <owner>/<media id>; used without a database
        #[arg(long, env = "REELCAST_MEDIA_ROOT", default_value = "./media")]
        media_root: PathBuf,

        /// Bytes per chunk frame
        #[arg(long, env = "FILE_READER_CHUNK_SIZE", default_value_t = 1024 * 1024, value_parser = parse_chunk_size)]
        chunk_size: usize,

        /// Actions buffered per connection before reading pauses
        #[arg(long, env = "REELCAST_ACTION_QUEUE", default_value_t = 1)]
        action_queue: usize,
    },

    /// Issue, inspect and block session tokens
    ///
    /// Examples:
    ///   reelcast token issue 507f191e810c19729de860ea
    ///   reelcast token verify eyJhbGciOi...
    ///   reelcast token block eyJhbGciOi... --reason logout
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Register media files for streaming (requires a database)
    ///
    /// Examples:
    ///   reelcast media add 507f191e810c19729de860ea ./clips/intro.mp4 --name intro
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },

    /// Initialize the database schema
    Init,
}

#[derive(Subcommand)]
pub enum MediaCommands {
    /// Register a file under an owner and print its media id
    Add {
        /// Owning user id (24 hex characters)
        owner: String,

        /// Path to the media file
        path: PathBuf,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a user
    Issue {
        /// User id (24 hex characters)
        user_id: String,
    },

    /// Verify a token and print its user
    Verify {
        token: String,
    },

    /// Block a token so it never verifies again
    Block {
        token: String,

        /// Why the token is blocked
        #[arg(long, default_value = "revoked")]
        reason: String,
    },
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|e| format!("Invalid chunk size {}: {}", s, e))?;
    if size > MAX_CHUNK_SIZE {
        return Err(format!("Chunk size {} exceeds the maximum of {}", size, MAX_CHUNK_SIZE));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("0"), Ok(0));
        assert_eq!(parse_chunk_size("1048576"), Ok(1_048_576));
        assert!(parse_chunk_size("-1").is_err());
        assert!(parse_chunk_size("lots").is_err());
        assert!(parse_chunk_size(&(MAX_CHUNK_SIZE as u64 + 1).to_string()).is_err());
    }

    #[test]
    fn test_media_add_args() {
        let cli = Cli::try_parse_from([
            "reelcast",
            "media",
            "add",
            "507f191e810c19729de860ea",
            "clips/intro.mp4",
            "--name",
            "intro",
        ])
        .unwrap();

        match cli.command {
            Commands::Media {
                command: MediaCommands::Add { owner, path, name },
            } => {
                assert_eq!(owner, "507f191e810c19729de860ea");
                assert_eq!(path, PathBuf::from("clips/intro.mp4"));
                assert_eq!(name.as_deref(), Some("intro"));
            }
            _ => panic!("expected media add"),
        }
    }

    #[test]
    fn test_serve_rejects_oversized_chunks() {
        let too_big = (MAX_CHUNK_SIZE as u64 + 1).to_string();
        assert!(Cli::try_parse_from(["reelcast", "serve", "--chunk-size", too_big.as_str()]).is_err());
    }
}
