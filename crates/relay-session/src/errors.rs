//! Session, token, and authentication error types.

use relay_cache::CacheError;
use relay_core::SessionId;

/// Errors from bearer token issuance and verification.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The signing secret is not configured. Fails fast, never retried.
    #[error("token signing secret is not configured")]
    MissingSecret,

    /// Signature, algorithm, claim, or expiry failure from the JWT layer.
    /// Verification fails closed on every variant.
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Errors from the session store.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `create` was called without a user id.
    #[error("session create requires a user id")]
    MissingUserId,

    /// No record exists for the given session id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Underlying cache failure, surfaced verbatim.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Token issuance failed while building the record.
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Errors from the connection handshake's identity check.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The presented token failed verification.
    #[error("invalid token")]
    InvalidToken(#[source] TokenError),

    /// The token verified but no live session record backs it.
    #[error("no active session for presented token")]
    SessionNotFound,

    /// The session store could not be consulted. The hub treats this the
    /// same as a failed verification.
    #[error(transparent)]
    Store(#[from] SessionError),
}

/// Errors from the out-of-scope relational user repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Backend failure described by the implementation.
    #[error("user lookup failed: {0}")]
    Backend(String),
}
