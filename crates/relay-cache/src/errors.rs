//! Cache error taxonomy.
//!
//! Configuration errors fail fast and are never retried; backend errors are
//! surfaced verbatim, leaving retry policy to a higher layer.

use std::time::Duration;

/// Errors returned by [`crate::CacheStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Invalid input detected before any network call (empty key or value,
    /// zero TTL, empty connection URL).
    #[error("cache configuration error: {0}")]
    Config(String),

    /// The key does not exist.
    #[error("cache key not found: {key}")]
    NotFound {
        /// The (namespaced) key that was looked up.
        key: String,
    },

    /// The operation exceeded its derived deadline.
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend or network error, returned verbatim.
    #[error(transparent)]
    Backend(#[from] redis::RedisError),

    /// Value could not be serialized or deserialized.
    #[error("cache value serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience result alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
