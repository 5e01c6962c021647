//! Relational user repository, a collaborator implemented out of tree.

use async_trait::async_trait;
use relay_core::UserId;
use serde::{Deserialize, Serialize};

use crate::errors::RepositoryError;

/// Minimal user record surfaced by the repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Login name.
    pub login: String,
    /// Optional display name.
    pub display_name: Option<String>,
}

/// Lookup interface over the relational persistence layer.
///
/// The session middleware consumes this; the hub itself never does.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Look up a user by id.
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// Look up a user by login name.
    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError>;
}
