//! Configuration error type.

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file contained invalid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required value is missing or out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Convenience result alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;
