//! # relay-session
//!
//! Session record lifecycle on top of [`relay_cache`]:
//!
//! - [`Session`]: a user id bound to a signed bearer token with expiry and
//!   sliding refresh timestamps
//! - [`token`]: HS256 bearer token issuance and fail-closed verification
//! - [`SessionStore`]: create / fetch / delete / refresh, plus the
//!   [`Authenticator`] capability the connection hub verifies against
//! - [`identity`]: cookie/header resolution used by the session middleware
//! - [`UserRepository`]: the relational collaborator interface consumed by
//!   the middleware (implemented out of tree)

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod repository;
pub mod session;
pub mod store;
pub mod token;

pub use errors::{AuthError, RepositoryError, SessionError, TokenError};
pub use repository::{User, UserRepository};
pub use session::Session;
pub use store::{AuthIdentity, Authenticator, SessionStore};
