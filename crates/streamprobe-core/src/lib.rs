//! streamprobe-core — configuration for the streaming pipeline liveness probe.
//!
//! A [`ProbeConfig`] is assembled from four layers, lowest precedence first:
//! built-in defaults, an optional TOML file, environment variables, and
//! command-line overrides. The result is validated once and then handed to
//! the evaluator in `streamprobe-health`.

pub mod config;
pub mod error;

pub use config::{ProbeConfig, ProbeFile, ProbeOverrides, StorageConfig, StorageFile};
pub use error::{ConfigError, ConfigResult};
