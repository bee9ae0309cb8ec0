//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while assembling a [`crate::ProbeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Arguments(String),

    #[error("invalid process pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unsupported storage endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid storage endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("bucket name must not be empty")]
    EmptyBucket,
}
