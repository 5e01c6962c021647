//! Credential resolution for the session middleware.
//!
//! Web clients carry the session id in an HTTP-only cookie; non-cookie
//! clients present the bearer token in a header. Either credential resolves
//! to a live session plus its user, refreshing the session in place when the
//! sliding refresh mark has passed. Any verification failure deletes the
//! session so it is never left half-authenticated.

use relay_core::SessionId;
use tracing::{debug, warn};

use crate::errors::{AuthError, RepositoryError, SessionError};
use crate::repository::{User, UserRepository};
use crate::session::Session;
use crate::store::SessionStore;

/// Name of the HTTP-only cookie carrying the session id.
pub const SESSION_COOKIE: &str = "sessionID";

/// Response header carrying the bearer token for non-cookie clients.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// A credential presented by the surrounding HTTP layer.
#[derive(Clone, Debug)]
pub enum Credential {
    /// Session id from the session cookie.
    SessionCookie(SessionId),
    /// Bearer token from the authorization header.
    BearerToken(String),
}

/// A fully resolved identity.
#[derive(Clone, Debug)]
pub struct ResolvedIdentity {
    /// The authenticated user.
    pub user: User,
    /// The live session. When `refreshed` is set this is the replacement
    /// record; the caller re-applies cookie and token header from it.
    pub session: Session,
    /// Whether the session was refreshed during resolution.
    pub refreshed: bool,
}

/// Errors from credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The session's hard expiry has passed.
    #[error("session expired")]
    Expired,

    /// The session references a user the repository no longer knows.
    #[error("session user not found")]
    UnknownUser,

    /// Token verification failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Session store failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// User repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Resolve a credential to its user and live session.
pub async fn resolve_identity(
    store: &SessionStore,
    users: &dyn UserRepository,
    credential: &Credential,
) -> Result<ResolvedIdentity, IdentityError> {
    let session = match credential {
        Credential::SessionCookie(session_id) => store.fetch(session_id).await?,
        Credential::BearerToken(token) => {
            let identity = store.authenticate(token).await?;
            store.fetch(&identity.session_id).await?
        }
    };

    if session.is_expired() {
        discard(store, &session).await;
        return Err(IdentityError::Expired);
    }

    let (session, refreshed) = if session.needs_refresh() {
        debug!(session_id = %session.id, "refreshing session");
        (store.refresh(&session).await?, true)
    } else {
        (session, false)
    };

    let Some(user) = users.get_user_by_id(&session.user_id).await? else {
        discard(store, &session).await;
        return Err(IdentityError::UnknownUser);
    };

    Ok(ResolvedIdentity {
        user,
        session,
        refreshed,
    })
}

async fn discard(store: &SessionStore, session: &Session) {
    if let Err(err) = store.delete(&session.id).await {
        warn!(session_id = %session.id, error = %err, "failed to delete rejected session");
    }
}
