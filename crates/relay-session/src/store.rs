//! Cache-backed session store and the hub's authentication capability.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use relay_cache::{CacheError, CacheOptions, CacheStore};
use relay_core::config::SecurityConfig;
use relay_core::{SessionId, UserId};
use tracing::{debug, warn};

use crate::errors::{AuthError, SessionError};
use crate::session::Session;
use crate::token;

/// Hard session lifetime: 7 days.
pub const SESSION_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Sliding refresh mark: 5 days.
pub const SESSION_REFRESH_SECS: u64 = 5 * 24 * 60 * 60;

/// Namespace prefix for session records.
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Namespace prefix for the per-user session index sets.
pub const USER_INDEX_PREFIX: &str = "user-sessions:";

fn lifetime(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Identity resolved from a verified bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    /// The token's subject.
    pub user_id: UserId,
    /// The live session backing the token.
    pub session_id: SessionId,
}

/// Capability the connection hub verifies handshake tokens against.
///
/// Implemented by [`SessionStore`]; tests substitute a stub.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a presented bearer token and resolve its identity.
    async fn authenticate(&self, token: &str) -> Result<AuthIdentity, AuthError>;
}

/// Session record lifecycle on top of the cache store.
pub struct SessionStore {
    cache: Arc<CacheStore>,
    secret: String,
    issuer: String,
}

impl SessionStore {
    /// Create a store using the configured signing secret and issuer.
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, security: &SecurityConfig) -> Self {
        Self {
            cache,
            secret: security.jwt_secret.clone(),
            issuer: security.token_issuer.clone(),
        }
    }

    fn record_options(&self) -> CacheOptions {
        CacheOptions::new()
            .with_prefix(SESSION_KEY_PREFIX)
            .with_ttl(StdDuration::from_secs(SESSION_EXPIRY_SECS))
    }

    fn index_options(&self) -> CacheOptions {
        CacheOptions::new().with_prefix(USER_INDEX_PREFIX)
    }

    /// Create a session for `user_id`.
    ///
    /// Generates a new time-ordered id, issues a token bound to the record's
    /// expiry, persists the record with TTL equal to the session lifetime,
    /// and indexes the session under its user.
    pub async fn create(&self, user_id: &UserId) -> Result<Session, SessionError> {
        if user_id.is_empty() {
            return Err(SessionError::MissingUserId);
        }

        let session = Session::issue(
            user_id.clone(),
            &self.issuer,
            &self.secret,
            lifetime(SESSION_EXPIRY_SECS),
            lifetime(SESSION_REFRESH_SECS),
        )?;

        self.cache
            .set_json(session.id.as_str(), &session, &self.record_options())
            .await?;
        self.cache
            .add_member(user_id.as_str(), session.id.as_str(), &self.index_options())
            .await?;

        debug!(session_id = %session.id, user_id = %user_id, "session created");
        Ok(session)
    }

    /// Load the record for `session_id`.
    ///
    /// Expired content is returned as-is; expiry is the caller's check.
    pub async fn fetch(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        match self
            .cache
            .get_json::<Session>(session_id.as_str(), &self.record_options())
            .await
        {
            Ok(session) => Ok(session),
            Err(CacheError::NotFound { .. }) => Err(SessionError::NotFound(session_id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the record for `session_id`. Absence is not an error.
    pub async fn delete(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let owner = match self.fetch(session_id).await {
            Ok(session) => Some(session.user_id),
            Err(SessionError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        self.cache
            .delete(session_id.as_str(), &self.record_options())
            .await?;

        if let Some(user_id) = owner {
            self.cache
                .remove_member(user_id.as_str(), session_id.as_str(), &self.index_options())
                .await?;
        }

        debug!(session_id = %session_id, "session deleted");
        Ok(())
    }

    /// Replace a session whose refresh mark has passed.
    ///
    /// Issues a new id and token with advanced timestamps, persists the new
    /// record, and removes the old one best-effort.
    pub async fn refresh(&self, session: &Session) -> Result<Session, SessionError> {
        let renewed = self.create(&session.user_id).await?;

        if let Err(err) = self.delete(&session.id).await {
            warn!(session_id = %session.id, error = %err, "failed to remove refreshed session");
        }

        Ok(renewed)
    }

    /// Verify a presented token and locate the session record backing it.
    ///
    /// Fails closed: a bad signature, wrong algorithm, expired claims, or a
    /// token without a live matching record all yield an error. Stale index
    /// entries are skipped.
    pub async fn authenticate(&self, presented: &str) -> Result<AuthIdentity, AuthError> {
        let claims = token::verify(presented, &self.secret).map_err(AuthError::InvalidToken)?;
        let user_id = UserId::from(claims.sub);

        let session_ids = self
            .cache
            .members(user_id.as_str(), &self.index_options())
            .await
            .map_err(SessionError::from)?;

        for id in session_ids {
            match self.fetch(&SessionId::from(id)).await {
                Ok(session) if session.token == presented && !session.is_expired() => {
                    return Ok(AuthIdentity {
                        user_id,
                        session_id: session.id,
                    });
                }
                Ok(_) | Err(SessionError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(AuthError::SessionNotFound)
    }
}

#[async_trait]
impl Authenticator for SessionStore {
    async fn authenticate(&self, token: &str) -> Result<AuthIdentity, AuthError> {
        SessionStore::authenticate(self, token).await
    }
}
