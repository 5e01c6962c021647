//! Immutable per-operation options.
//!
//! Replaces the accumulating builder of earlier designs: the value is
//! constructed up front, has no hidden mutable state, and can be reused
//! across any number of operations.

use std::time::{Duration, Instant};

/// Default time-to-live applied when none is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default per-operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options describing how a single cache operation executes.
#[derive(Clone, Debug)]
pub struct CacheOptions {
    key_prefix: Option<String>,
    ttl: Duration,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key_prefix: None,
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_OP_TIMEOUT,
            deadline: None,
        }
    }
}

impl CacheOptions {
    /// Options with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace keys with the given prefix (e.g. `"session:"`).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Time-to-live for values written by `set`/`set_json`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Default timeout applied when no nearer deadline is present.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline inherited from the caller's request context.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Apply the key prefix once, idempotently.
    ///
    /// A key that already carries the prefix is returned unchanged, so the
    /// transformation is safe to apply at every call site.
    #[must_use]
    pub fn apply_prefix(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) if !key.starts_with(prefix.as_str()) => format!("{prefix}{key}"),
            _ => key.to_owned(),
        }
    }

    /// Derive the execution bound for one operation.
    ///
    /// If an inbound deadline is nearer than the default timeout, the
    /// remaining time to that deadline is used; an existing deadline is
    /// never lengthened. A deadline already in the past yields a zero
    /// bound. Without a deadline the default timeout applies.
    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                remaining.min(self.timeout)
            }
            None => self.timeout,
        }
    }
}
