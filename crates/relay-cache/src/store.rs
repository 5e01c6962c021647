//! Cache store over a Redis-compatible backend.
//!
//! Each operation validates its inputs before touching the network, derives
//! its execution bound from the caller's [`CacheOptions`], and surfaces
//! backend errors verbatim.

use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{CacheError, Result};
use crate::options::CacheOptions;

/// Typed key/value access to the cache service.
///
/// The underlying client is cheap to clone and safe for concurrent use; a
/// fresh multiplexed connection is acquired per operation, inside the
/// operation's deadline bound.
#[derive(Clone, Debug)]
pub struct CacheStore {
    client: redis::Client,
}

impl CacheStore {
    /// Create a store for the given connection URL.
    ///
    /// An empty URL is a configuration error, not a panic. No connection is
    /// attempted here; the first operation connects lazily.
    pub fn connect(url: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(CacheError::Config("cache connection url is empty".into()));
        }
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    /// Store a plain string value under `key` with the options' TTL.
    pub async fn set(&self, key: &str, value: &str, options: &CacheOptions) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::Config("key is required".into()));
        }
        if value.is_empty() {
            return Err(CacheError::Config("value is required".into()));
        }
        if options.ttl().is_zero() {
            return Err(CacheError::Config("ttl must be positive".into()));
        }

        let key = options.apply_prefix(key);
        let ttl = options.ttl().as_secs();
        bounded(options.op_timeout(), async move {
            let mut conn = self.connection().await?;
            let _: () = conn.set_ex(&key, value, ttl).await?;
            Ok(())
        })
        .await
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: &CacheOptions,
    ) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        if serialized.is_empty() || serialized == "null" {
            return Err(CacheError::Config("value is required".into()));
        }
        self.set(key, &serialized, options).await
    }

    /// Fetch the string value stored under `key`.
    pub async fn get(&self, key: &str, options: &CacheOptions) -> Result<String> {
        let key = options.apply_prefix(key);
        bounded(options.op_timeout(), async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(&key).await?;
            value.ok_or(CacheError::NotFound { key })
        })
        .await
    }

    /// Fetch and deserialize the JSON value stored under `key`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &CacheOptions,
    ) -> Result<T> {
        let raw = self.get(key, options).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Remove `key`. Absence of the key is not an error.
    pub async fn delete(&self, key: &str, options: &CacheOptions) -> Result<()> {
        let key = options.apply_prefix(key);
        bounded(options.op_timeout(), async {
            let mut conn = self.connection().await?;
            let _: () = conn.del(&key).await?;
            Ok(())
        })
        .await
    }

    /// Add `member` to the set stored under `key`.
    pub async fn add_member(&self, key: &str, member: &str, options: &CacheOptions) -> Result<()> {
        if member.is_empty() {
            return Err(CacheError::Config("member is required".into()));
        }
        let key = options.apply_prefix(key);
        bounded(options.op_timeout(), async move {
            let mut conn = self.connection().await?;
            let _: () = conn.sadd(&key, member).await?;
            Ok(())
        })
        .await
    }

    /// Remove `member` from the set stored under `key`.
    pub async fn remove_member(
        &self,
        key: &str,
        member: &str,
        options: &CacheOptions,
    ) -> Result<()> {
        if member.is_empty() {
            return Err(CacheError::Config("member is required".into()));
        }
        let key = options.apply_prefix(key);
        bounded(options.op_timeout(), async move {
            let mut conn = self.connection().await?;
            let _: () = conn.srem(&key, member).await?;
            Ok(())
        })
        .await
    }

    /// List the members of the set stored under `key`.
    ///
    /// A missing key yields an empty list.
    pub async fn members(&self, key: &str, options: &CacheOptions) -> Result<Vec<String>> {
        let key = options.apply_prefix(key);
        bounded(options.op_timeout(), async {
            let mut conn = self.connection().await?;
            let members: Vec<String> = conn.smembers(&key).await?;
            Ok(members)
        })
        .await
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

/// Run `op` under the derived deadline, mapping elapse to
/// [`CacheError::Timeout`].
async fn bounded<T, F>(bound: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(bound, op).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(bound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Points at a port nothing listens on; validation must reject bad input
    // before any connection attempt, so these tests never touch the network.
    fn unreachable_store() -> CacheStore {
        CacheStore::connect("redis://127.0.0.1:1/").unwrap()
    }

    #[test]
    fn connect_rejects_empty_url() {
        let err = CacheStore::connect("").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn connect_rejects_malformed_url() {
        let result = CacheStore::connect("not-a-url");
        assert!(result.is_err());
    }

    #[test]
    fn connect_accepts_valid_url() {
        assert!(CacheStore::connect("redis://127.0.0.1:6379/").is_ok());
    }

    #[tokio::test]
    async fn set_rejects_empty_key() {
        let store = unreachable_store();
        let err = store
            .set("", "value", &CacheOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
        assert!(err.to_string().contains("key"));
    }

    #[tokio::test]
    async fn set_rejects_empty_value() {
        let store = unreachable_store();
        let err = store.set("key", "", &CacheOptions::new()).await.unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
        assert!(err.to_string().contains("value"));
    }

    #[tokio::test]
    async fn set_rejects_zero_ttl() {
        let store = unreachable_store();
        let opts = CacheOptions::new().with_ttl(Duration::ZERO);
        let err = store.set("key", "value", &opts).await.unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
        assert!(err.to_string().contains("ttl"));
    }

    #[tokio::test]
    async fn set_json_rejects_null_value() {
        let store = unreachable_store();
        let err = store
            .set_json("key", &serde_json::Value::Null, &CacheOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn add_member_rejects_empty_member() {
        let store = unreachable_store();
        let err = store
            .add_member("key", "", &CacheOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn remove_member_rejects_empty_member() {
        let store = unreachable_store();
        let err = store
            .remove_member("key", "", &CacheOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[tokio::test]
    async fn expired_deadline_fails_fast() {
        // Blackhole address: the connect attempt would hang, so only the
        // zero bound from the passed deadline can end the call promptly.
        let store = CacheStore::connect("redis://10.255.255.1:6379/").unwrap();
        let opts = CacheOptions::new()
            .with_deadline(std::time::Instant::now() - Duration::from_secs(1));
        let started = std::time::Instant::now();
        let err = store.get("key", &opts).await.unwrap_err();
        assert!(matches!(err, CacheError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unreachable_backend_is_not_a_config_error() {
        let store = unreachable_store();
        let opts = CacheOptions::new().with_timeout(Duration::from_millis(200));
        let err = store.get("key", &opts).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Backend(_) | CacheError::Timeout(_)
        ));
    }
}
