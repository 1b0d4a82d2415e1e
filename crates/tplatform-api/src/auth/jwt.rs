//! JWT token generation and validation
//!
//! Access tokens are HS256-signed JWTs carrying the identity claim set and
//! an expiry. They are signed, not encrypted: nothing secret goes in them.

use super::models::CurrentUser;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Subject marker set on every session token
pub const SESSION_SUBJECT: &str = "user_session";

/// JWT Claims structure containing user information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject marker (always [`SESSION_SUBJECT`])
    pub sub: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            name: claims.name,
            email: claims.email,
            is_active: claims.is_active,
            is_admin: claims.is_admin,
        }
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode JWT: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid token signature or claims")]
    Invalid,

    #[error("Token has expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

/// Signs and verifies session tokens
pub trait TokenCodec: Send + Sync {
    /// Issue a token for `identity` that expires `ttl` from now
    fn issue(&self, identity: &CurrentUser, ttl: Duration) -> Result<String, TokenError>;

    /// Verify signature and expiry and return the identity
    fn verify(&self, token: &str) -> Result<CurrentUser, TokenError>;
}

/// HS256 implementation of [`TokenCodec`]
#[derive(Clone)]
pub struct JwtCodec {
    secret: String,
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec").finish_non_exhaustive()
    }
}

impl JwtCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenCodec for JwtCodec {
    fn issue(&self, identity: &CurrentUser, ttl: Duration) -> Result<String, TokenError> {
        issue_token(identity, ttl, &self.secret)
    }

    fn verify(&self, token: &str) -> Result<CurrentUser, TokenError> {
        verify_token(token, &self.secret).map(CurrentUser::from)
    }
}

/// Generate a signed access token
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tplatform_api::auth::{jwt::issue_token, CurrentUser};
/// use uuid::Uuid;
///
/// let identity = CurrentUser {
///     id: Uuid::new_v4(),
///     name: "Alice".to_string(),
///     email: "alice@x.com".to_string(),
///     is_active: true,
///     is_admin: false,
/// };
/// let token = issue_token(&identity, Duration::from_secs(3600), "secret")
///     .expect("Failed to generate token");
/// ```
pub fn issue_token(
    identity: &CurrentUser,
    ttl: Duration,
    secret: &str,
) -> Result<String, TokenError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    let claims = Claims {
        sub: SESSION_SUBJECT.to_string(),
        iat: now,
        exp: now + ttl.as_secs(),
        id: identity.id,
        name: identity.name.clone(),
        email: identity.email.clone(),
        is_active: identity.is_active,
        is_admin: identity.is_admin,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Encoding)
}

/// Validate a token and extract its claims
///
/// Signature is checked before any claim is trusted. No clock leeway is
/// granted: a token is rejected once the current second is past `exp`, so
/// it is still accepted during the expiry second itself.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.sub = Some(SESSION_SUBJECT.to_string());
    validation.set_required_spec_claims(&["exp", "sub"]);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidSubject
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature => TokenError::Invalid,
        _ => TokenError::Malformed,
    })?;

    Ok(token_data.claims)
}
