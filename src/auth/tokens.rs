//! Session token issuance, verification and revocation
//!
//! Tokens are compact JWTs signed with a shared HMAC secret. Claims:
//! - `sub`: hex user id
//! - `iss`: issuer
//! - `exp`: unix expiry
//!
//! Verification order: header algorithm, signing method family, signature,
//! revocation, expiry, issuer, subject.

use crate::id::ObjectId;
use crate::storage::{with_timeout, RevocationRecord, RevocationStore, StorageError};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, get_current_timestamp, Algorithm,
    DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a token was rejected
///
/// Kept for logs and tests; peers only ever see "access token is invalid".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidCause {
    /// Not a decodable JWT, or its claims are missing or mistyped
    Malformed(String),
    /// Header `alg` differs from the configured algorithm
    AlgorithmMismatch { expected: Algorithm, got: Algorithm },
    /// Header names a non-HMAC algorithm
    UnexpectedSigningMethod(Algorithm),
    BadSignature,
    Expired,
    IssuerMismatch(String),
    MalformedSubject(String),
}

impl fmt::Display for InvalidCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidCause::Malformed(e) => write!(f, "malformed token: {}", e),
            InvalidCause::AlgorithmMismatch { expected, got } => {
                write!(f, "token algorithm {:?} does not match configured {:?}", got, expected)
            }
            InvalidCause::UnexpectedSigningMethod(alg) => {
                write!(f, "unexpected signing method {:?}", alg)
            }
            InvalidCause::BadSignature => write!(f, "signature does not verify"),
            InvalidCause::Expired => write!(f, "token has expired"),
            InvalidCause::IssuerMismatch(iss) => write!(f, "issuer '{}' is not accepted", iss),
            InvalidCause::MalformedSubject(sub) => write!(f, "subject '{}' is not a user id", sub),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("access token is invalid")]
    Invalid(InvalidCause),

    #[error("access token has been blocked")]
    Blocked,

    #[error("revocation store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("invalid token configuration: {0}")]
    Config(String),
}

impl TokenError {
    /// The rejection cause, for invalid tokens
    pub fn cause(&self) -> Option<&InvalidCause> {
        match self {
            TokenError::Invalid(cause) => Some(cause),
            _ => None,
        }
    }

    /// Text safe to show a peer; backend detail stays in the logs
    pub fn peer_message(&self) -> &'static str {
        match self {
            TokenError::Invalid(_) => "access token is invalid",
            TokenError::Blocked => "access token has been blocked",
            TokenError::Storage(_) | TokenError::Signing(_) | TokenError::Config(_) => {
                "service unavailable"
            }
        }
    }
}

/// Claims carried by every session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: u64,
}

/// Token service settings
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: Vec<u8>,
    /// Issuer written into new tokens; always accepted
    pub issuer: String,
    /// Further issuers whose tokens are accepted
    pub accepted_issuers: Vec<String>,
    /// JWT algorithm name, e.g. `HS256`
    pub algorithm: String,
    pub ttl: Duration,
    /// Upper bound on each revocation store call
    pub store_timeout: Duration,
}

impl TokenConfig {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            accepted_issuers: Vec::new(),
            algorithm: "HS256".to_string(),
            ttl: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("accepted_issuers", &self.accepted_issuers)
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Issues, verifies and revokes session tokens
pub struct TokenService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    accepted_issuers: Vec<String>,
    ttl: Duration,
    store_timeout: Duration,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenService {
    pub fn new(config: TokenConfig, revocations: Arc<dyn RevocationStore>) -> Result<Self, TokenError> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| TokenError::Config(format!("unknown algorithm '{}'", config.algorithm)))?;

        if !is_hmac(algorithm) {
            warn!(
                algorithm = ?algorithm,
                "Configured token algorithm is not HMAC; every token will be rejected"
            );
        }
        if config.secret.is_empty() {
            return Err(TokenError::Config("token secret is empty".to_string()));
        }

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(&config.secret),
            decoding_key: DecodingKey::from_secret(&config.secret),
            issuer: config.issuer,
            accepted_issuers: config.accepted_issuers,
            ttl: config.ttl,
            store_timeout: config.store_timeout,
            revocations,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Issue a token for `user_id`, valid for the configured TTL
    pub fn issue(&self, user_id: &ObjectId) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id.to_hex(),
            iss: self.issuer.clone(),
            exp: get_current_timestamp() + self.ttl.as_secs(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify a token and return the user it was issued to
    pub async fn verify(&self, token: &str) -> Result<ObjectId, TokenError> {
        let claims = self.decode_signed(token).map_err(log_invalid)?;

        let blocked = with_timeout(self.store_timeout, self.revocations.has(token)).await?;
        if blocked {
            debug!(sub = %claims.sub, "Rejected blocked token");
            return Err(TokenError::Blocked);
        }

        if claims.exp <= get_current_timestamp() {
            return Err(log_invalid(InvalidCause::Expired));
        }

        if !self.is_accepted_issuer(&claims.iss) {
            return Err(log_invalid(InvalidCause::IssuerMismatch(claims.iss)));
        }

        ObjectId::parse_hex(&claims.sub)
            .map_err(|_| log_invalid(InvalidCause::MalformedSubject(claims.sub)))
    }

    /// Revoke a token so that it never verifies again
    ///
    /// Malformed and expired tokens are revocable too; the owner is recorded
    /// only when it can be read from a correctly signed token.
    pub async fn block(&self, token: &str, reason: &str) -> Result<(), TokenError> {
        let user_id = match self.decode_signed(token) {
            Ok(claims) => match ObjectId::parse_hex(&claims.sub) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "Blocking token with unreadable subject");
                    None
                }
            },
            Err(cause) => {
                warn!(cause = %cause, "Blocking token that does not verify");
                None
            }
        };

        let record = RevocationRecord::new(token, reason, user_id);
        with_timeout(self.store_timeout, self.revocations.insert(record)).await?;

        debug!(user_id = ?user_id, reason = reason, "Token blocked");
        Ok(())
    }

    /// Structural and signature checks; expiry is checked by the caller
    fn decode_signed(&self, token: &str) -> Result<Claims, InvalidCause> {
        let header = decode_header(token).map_err(|e| InvalidCause::Malformed(e.to_string()))?;

        if header.alg != self.algorithm {
            return Err(InvalidCause::AlgorithmMismatch {
                expected: self.algorithm,
                got: header.alg,
            });
        }
        if !is_hmac(header.alg) {
            return Err(InvalidCause::UnexpectedSigningMethod(header.alg));
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => InvalidCause::BadSignature,
                _ => InvalidCause::Malformed(e.to_string()),
            })
    }

    fn is_accepted_issuer(&self, iss: &str) -> bool {
        iss == self.issuer || self.accepted_issuers.iter().any(|accepted| accepted == iss)
    }
}

fn log_invalid(cause: InvalidCause) -> TokenError {
    warn!(cause = %cause, "Rejected session token");
    TokenError::Invalid(cause)
}
