//! Session authentication
//!
//! Session tokens are HMAC-signed JWTs naming a user. A token verifies only
//! while it is unexpired, was issued by an accepted issuer, and has not been
//! blocked in the revocation store.

mod tokens;

pub use tokens::{Claims, InvalidCause, TokenConfig, TokenError, TokenService};
