//! Configuration loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelayConfig::default()`]
//! 2. If a config file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! The loaded value is threaded explicitly through constructors; nothing in
//! the workspace reads configuration from ambient global state.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{ConfigError, Result};

/// Top-level configuration for the relay server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP / WebSocket server settings.
    pub server: ServerConfig,
    /// Cache backend settings.
    pub cache: CacheConfig,
    /// Token signing settings.
    pub security: SecurityConfig,
}

/// HTTP and WebSocket server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Comma-separated CORS allow-origins (`*` for any).
    pub cors_allow_origins: String,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each client's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the hub broadcast intake.
    pub broadcast_capacity: usize,
    /// Interval between server-initiated ping frames, seconds.
    pub ping_interval_secs: u64,
    /// Liveness deadline for inbound traffic, seconds.
    pub pong_timeout_secs: u64,
    /// Deadline for each outbound socket write, seconds.
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_allow_origins: "*".into(),
            max_message_size: 1024 * 1024, // 1 MiB
            mailbox_capacity: 64,
            broadcast_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Ping interval as a [`Duration`].
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Liveness deadline as a [`Duration`].
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Write deadline as a [`Duration`].
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Cache backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Connection URL of the Redis-compatible cache service.
    pub url: String,
    /// Default per-operation timeout, seconds.
    pub op_timeout_secs: u64,
    /// Default time-to-live for cached values, seconds.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            op_timeout_secs: 5,
            default_ttl_secs: 3600,
        }
    }
}

/// Token signing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Symmetric signing secret for bearer tokens. Must be set.
    pub jwt_secret: String,
    /// Issuer claim stamped into every token.
    pub token_issuer: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_issuer: "relay_api".into(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from an optional JSON file with env overrides.
    ///
    /// A missing file yields the defaults; invalid JSON is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = if path.exists() {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "config file not found, using defaults");
            defaults
        };

        let mut config: Self = serde_json::from_value(merged)?;
        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Fail fast on values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "security.jwt_secret must be set".into(),
            ));
        }
        if self.cache.url.is_empty() {
            return Err(ConfigError::Invalid("cache.url must be set".into()));
        }
        Ok(())
    }
}

/// Recursive deep merge of two JSON values.
///
/// Objects are merged recursively (source overrides target per key); arrays
/// and primitives are replaced entirely; null values in the source are
/// skipped, preserving the target.
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to a loaded configuration.
///
/// Integers must parse and fall within range; invalid values are ignored
/// with a warning, falling back to the file or default value.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    if let Some(v) = read_env_string("RELAY_HOST") {
        config.server.host = v;
    }
    if let Some(v) = read_env_u16("RELAY_PORT", 1, 65535) {
        config.server.port = v;
    }
    if let Some(v) = read_env_string("RELAY_CORS_ORIGINS") {
        config.server.cors_allow_origins = v;
    }
    if let Some(v) = read_env_string("RELAY_CACHE_URL") {
        config.cache.url = v;
    }
    if let Some(v) = read_env_u64("RELAY_CACHE_TIMEOUT_SECS", 1, 300) {
        config.cache.op_timeout_secs = v;
    }
    if let Some(v) = read_env_string("RELAY_JWT_SECRET") {
        config.security.jwt_secret = v;
    }
    if let Some(v) = read_env_string("RELAY_TOKEN_ISSUER") {
        config.security.token_issuer = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
#[must_use]
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
#[must_use]
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
