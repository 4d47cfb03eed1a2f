//! Credential and token handling: password hashing, one-time verification and
//! reset tokens, and signed session credentials.
//!
//! Raw tokens are never persisted; only their SHA-256 hashes are stored, so a
//! leaked database does not leak usable tokens.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::User;

/// Lifetime of an email verification token
pub const VERIFICATION_TOKEN_HOURS: i64 = 24;

/// Lifetime of a password reset token
pub const RESET_TOKEN_MINUTES: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Please verify your email to continue")]
    EmailNotVerified,
    #[error("Failed to hash password")]
    Hash,
    #[error("Invalid session token")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|_| CredentialError::Hash)?;
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| CredentialError::Hash)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random 32-byte token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Expiry timestamp for a freshly issued verification token
pub fn verification_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS)
}

/// Expiry timestamp for a freshly issued reset token
pub fn reset_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(RESET_TOKEN_MINUTES)
}

/// Claims embedded in a session credential
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Issue a signed session credential for an account.
///
/// Fails closed for unverified accounts: the check lives here so no caller can
/// mint a session for an account that never confirmed its email.
pub fn sign_session(
    user: &User,
    secret: &str,
    expires_days: i64,
) -> Result<String, CredentialError> {
    if !user.is_verified {
        return Err(CredentialError::EmailNotVerified);
    }

    let now = Utc::now();
    let claims = SessionClaims {
        sub: user.id.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::days(expires_days)).timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate a session credential and return its claims.
/// Signature and expiry failures both surface as `CredentialError::Token`.
pub fn decode_session(token: &str, secret: &str) -> Result<SessionClaims, CredentialError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
