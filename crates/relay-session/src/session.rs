//! The session record.

use chrono::{DateTime, Duration, Utc};
use relay_core::{SessionId, UserId};
use serde::{Deserialize, Serialize};

use crate::errors::TokenError;
use crate::token;

/// A server-side session binding a user id to a signed bearer token.
///
/// `expires_at` is the hard lifetime; `refresh_at` marks when a sliding
/// refresh becomes due (`refresh_at < expires_at`). Records live exclusively
/// in the cache store; nothing else keeps a copy beyond request scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id, generated server-side at creation.
    pub id: SessionId,
    /// Owning user.
    pub user_id: UserId,
    /// Signed bearer token bound to `expires_at`.
    pub token: String,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
    /// When a sliding refresh becomes due.
    pub refresh_at: DateTime<Utc>,
}

impl Session {
    /// Build a fresh record for `user_id` with a newly generated id and a
    /// token bound to the computed expiry.
    ///
    /// This is the only constructor, so a record with an empty id can never
    /// come into existence.
    pub fn issue(
        user_id: UserId,
        issuer: &str,
        secret: &str,
        expiry: Duration,
        refresh: Duration,
    ) -> Result<Self, TokenError> {
        let now = Utc::now();
        let expires_at = now + expiry;
        let refresh_at = now + refresh;
        let token = token::issue(&user_id, expires_at, issuer, secret)?;

        Ok(Self {
            id: SessionId::new(),
            user_id,
            token,
            expires_at,
            refresh_at,
        })
    }

    /// Whether the hard expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Whether a sliding refresh is due.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.refresh_at <= Utc::now()
    }
}
