//! Bearer token issuance and verification.
//!
//! Tokens are signed HS256 with the configured server secret. Verification
//! accepts exactly that algorithm; a token presenting any other algorithm is
//! rejected outright, as are tampered signatures and expired claims.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use relay_core::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TokenError;

/// Claims carried by every issued token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id the token was issued for.
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Unique token id (UUID v7).
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Not-before, Unix seconds.
    pub nbf: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Issue a signed token for `user_id`, valid until `expires_at`.
pub fn issue(
    user_id: &UserId,
    expires_at: DateTime<Utc>,
    issuer: &str,
    secret: &str,
) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iss: issuer.to_owned(),
        jti: Uuid::now_v7().to_string(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Verify signature, algorithm, and expiry; return the claims.
pub fn verify(token: &str, secret: &str) -> Result<Claims, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::MissingSecret);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_nbf = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}
