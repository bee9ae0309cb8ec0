//! Probe configuration: defaults, TOML file, environment, and CLI overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Where the pipeline persists its streaming checkpoint inside the container.
pub const DEFAULT_CHECKPOINT_PATH: &str = "/app/streaming_checkpoint.json";
/// Maximum checkpoint age before the pipeline is considered stalled.
pub const DEFAULT_FRESHNESS_THRESHOLD_SECS: u64 = 300;
/// Command-line pattern identifying the pipeline process.
pub const DEFAULT_PROCESS_PATTERN: &str = r"streaming_pipeline\.py";
/// Label used in the "process not running" reason.
pub const DEFAULT_PROCESS_NAME: &str = "Python";
/// Upper bound on the storage round-trip.
pub const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 5;
/// Bucket the pipeline writes to when `BUCKET_NAME` is unset.
pub const DEFAULT_BUCKET: &str = "fms-data";

/// Fully resolved probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Checkpoint artifact whose mtime is the progress signal.
    pub checkpoint_path: PathBuf,
    /// Inclusive freshness bound for the checkpoint, in seconds.
    pub freshness_threshold_secs: u64,
    /// Regular expression matched against process command lines.
    pub process_pattern: String,
    /// Human-readable name for the process in failure reasons.
    pub process_name: String,
    /// Object storage to confirm, or `None` to skip the storage check.
    pub storage: Option<StorageConfig>,
    /// Timeout applied to the storage round-trip.
    pub storage_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            freshness_threshold_secs: DEFAULT_FRESHNESS_THRESHOLD_SECS,
            process_pattern: DEFAULT_PROCESS_PATTERN.to_string(),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            storage: None,
            storage_timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECS),
        }
    }
}

/// Connection settings for the object-storage bucket check.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// `host[:port]`, optionally prefixed with `http://`.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl StorageConfig {
    /// The `host[:port]` part of the endpoint, used both to connect and as
    /// the signed `host` header.
    pub fn authority(&self) -> ConfigResult<&str> {
        let endpoint = self.endpoint.trim();
        let authority = match endpoint.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
            Some((scheme, _)) => return Err(ConfigError::UnsupportedScheme(scheme.to_string())),
            None => endpoint,
        }
        .trim_end_matches('/');

        if authority.is_empty() || authority.contains(['/', '?', '#', ' ', '@']) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        Ok(authority)
    }

    /// Whether requests should be signed. An empty access key means
    /// anonymous access.
    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty()
    }
}

/// On-disk TOML representation. Every key is optional.
///
/// ```toml
/// checkpoint_path = "/app/data/checkpoints/streaming_checkpoint.json"
/// max_age_secs = 300
/// process_pattern = 'streaming_pipeline\.py'
///
/// [storage]
/// endpoint = "minio:9000"
/// bucket = "fms-data"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeFile {
    pub checkpoint_path: Option<PathBuf>,
    pub max_age_secs: Option<u64>,
    pub process_pattern: Option<String>,
    pub process_name: Option<String>,
    pub storage_timeout_secs: Option<u64>,
    pub storage: Option<StorageFile>,
}

/// `[storage]` table of the TOML file, also the merge target for
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageFile {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
}

impl ProbeFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ProbeOverrides {
    pub checkpoint_path: Option<PathBuf>,
    pub max_age_secs: Option<u64>,
    pub process_pattern: Option<String>,
    pub process_name: Option<String>,
    pub storage_timeout_secs: Option<u64>,
    /// Disable the storage check even when configured.
    pub skip_storage: bool,
}

impl ProbeConfig {
    /// Assemble and validate a configuration from all layers.
    ///
    /// `env` looks up an environment variable by name; the binary passes
    /// `std::env::var(..).ok()`, tests pass a fixed map.
    pub fn load<F>(
        config_file: Option<&Path>,
        env: F,
        overrides: &ProbeOverrides,
    ) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match config_file {
            Some(path) => {
                let file = ProbeFile::from_file(path)?;
                debug!(path = %path.display(), "loaded probe config file");
                file
            }
            None => ProbeFile::default(),
        };

        let mut config = Self::from_layers(file, env);
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, a parsed file, and the environment. Does not validate.
    pub fn from_layers<F>(file: ProbeFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let storage = resolve_storage(file.storage.unwrap_or_default(), &env);

        Self {
            checkpoint_path: file.checkpoint_path.unwrap_or(defaults.checkpoint_path),
            freshness_threshold_secs: file
                .max_age_secs
                .unwrap_or(defaults.freshness_threshold_secs),
            process_pattern: file.process_pattern.unwrap_or(defaults.process_pattern),
            process_name: file.process_name.unwrap_or(defaults.process_name),
            storage,
            storage_timeout: file
                .storage_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.storage_timeout),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ProbeOverrides) {
        if let Some(path) = &overrides.checkpoint_path {
            self.checkpoint_path = path.clone();
        }
        if let Some(secs) = overrides.max_age_secs {
            self.freshness_threshold_secs = secs;
        }
        if let Some(pattern) = &overrides.process_pattern {
            self.process_pattern = pattern.clone();
        }
        if let Some(name) = &overrides.process_name {
            self.process_name = name.clone();
        }
        if let Some(secs) = overrides.storage_timeout_secs {
            self.storage_timeout = Duration::from_secs(secs);
        }
        if overrides.skip_storage {
            self.storage = None;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.freshness_threshold_secs == 0 {
            return Err(ConfigError::Zero("max age"));
        }
        if self.storage_timeout.is_zero() {
            return Err(ConfigError::Zero("storage timeout"));
        }
        self.process_regex()?;

        if let Some(storage) = &self.storage {
            storage.authority()?;
            if storage.bucket.trim().is_empty() {
                return Err(ConfigError::EmptyBucket);
            }
        }
        Ok(())
    }

    pub fn process_regex(&self) -> ConfigResult<Regex> {
        Ok(Regex::new(&self.process_pattern)?)
    }

    pub fn freshness_threshold(&self) -> Duration {
        Duration::from_secs(self.freshness_threshold_secs)
    }
}

/// Overlay environment variables on the file's `[storage]` table. The
/// storage check is enabled only when the resulting endpoint is non-empty.
fn resolve_storage<F>(file: StorageFile, env: &F) -> Option<StorageConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let endpoint = env_with_fallback(env, "STORAGE_ENDPOINT", "MINIO_ENDPOINT")
        .or(file.endpoint)
        .unwrap_or_default();
    if endpoint.trim().is_empty() {
        return None;
    }

    let access_key = env_with_fallback(env, "STORAGE_ACCESS_KEY", "MINIO_ACCESS_KEY")
        .or(file.access_key)
        .unwrap_or_default();
    let secret_key = env_with_fallback(env, "STORAGE_SECRET_KEY", "MINIO_SECRET_KEY")
        .or(file.secret_key)
        .unwrap_or_default();
    let bucket = env("BUCKET_NAME")
        .or(file.bucket)
        .unwrap_or_else(|| DEFAULT_BUCKET.to_string());

    Some(StorageConfig {
        endpoint,
        access_key,
        secret_key,
        bucket,
    })
}

/// The primary variable wins whenever it is set, even to an empty string.
fn env_with_fallback<F>(env: &F, primary: &str, fallback: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(primary).or_else(|| env(fallback))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_pipeline_layout() {
        let config = ProbeConfig::load(None, no_env, &ProbeOverrides::default()).unwrap();
        assert_eq!(config.checkpoint_path, PathBuf::from("/app/streaming_checkpoint.json"));
        assert_eq!(config.freshness_threshold(), Duration::from_secs(300));
        assert_eq!(config.process_name, "Python");
        assert_eq!(config.storage_timeout, Duration::from_secs(5));
        assert!(config.storage.is_none());
        assert!(config.process_regex().unwrap().is_match("python streaming_pipeline.py --mode stream"));
    }

    #[test]
    fn storage_enabled_by_endpoint() {
        let env = env_from(&[
            ("STORAGE_ENDPOINT", "minio:9000"),
            ("STORAGE_ACCESS_KEY", "ak"),
            ("STORAGE_SECRET_KEY", "sk"),
            ("BUCKET_NAME", "telemetry"),
        ]);
        let config = ProbeConfig::from_layers(ProbeFile::default(), env);
        let storage = config.storage.unwrap();
        assert_eq!(storage.endpoint, "minio:9000");
        assert_eq!(storage.access_key, "ak");
        assert_eq!(storage.secret_key, "sk");
        assert_eq!(storage.bucket, "telemetry");
    }

    #[test]
    fn empty_endpoint_disables_storage() {
        let env = env_from(&[("STORAGE_ENDPOINT", ""), ("BUCKET_NAME", "telemetry")]);
        let config = ProbeConfig::from_layers(ProbeFile::default(), env);
        assert!(config.storage.is_none());
    }

    #[test]
    fn credentials_without_endpoint_leave_storage_disabled() {
        let env = env_from(&[("STORAGE_ACCESS_KEY", "ak"), ("STORAGE_SECRET_KEY", "sk")]);
        let config = ProbeConfig::from_layers(ProbeFile::default(), env);
        assert!(config.storage.is_none());
    }

    #[test]
    fn minio_variables_are_fallbacks() {
        let env = env_from(&[
            ("MINIO_ENDPOINT", "minio:9000"),
            ("MINIO_ACCESS_KEY", "legacy-ak"),
            ("STORAGE_ACCESS_KEY", "ak"),
        ]);
        let config = ProbeConfig::from_layers(ProbeFile::default(), env);
        let storage = config.storage.unwrap();
        assert_eq!(storage.endpoint, "minio:9000");
        assert_eq!(storage.access_key, "ak");
        assert_eq!(storage.bucket, DEFAULT_BUCKET);
    }

    #[test]
    fn environment_overrides_file_storage() {
        let file = ProbeFile::from_toml(
            r#"
[storage]
endpoint = "file-host:9000"
bucket = "from-file"
access_key = "file-ak"
"#,
        )
        .unwrap();
        let env = env_from(&[("BUCKET_NAME", "from-env")]);
        let storage = ProbeConfig::from_layers(file, env).storage.unwrap();
        assert_eq!(storage.endpoint, "file-host:9000");
        assert_eq!(storage.access_key, "file-ak");
        assert_eq!(storage.bucket, "from-env");
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
checkpoint_path = "/data/checkpoints/streaming_checkpoint.json"
max_age_secs = 120
process_pattern = 'collector\.py'
process_name = "Collector"
storage_timeout_secs = 2
"#
        )
        .unwrap();

        let config =
            ProbeConfig::load(Some(file.path()), no_env, &ProbeOverrides::default()).unwrap();
        assert_eq!(
            config.checkpoint_path,
            PathBuf::from("/data/checkpoints/streaming_checkpoint.json")
        );
        assert_eq!(config.freshness_threshold_secs, 120);
        assert_eq!(config.process_pattern, r"collector\.py");
        assert_eq!(config.process_name, "Collector");
        assert_eq!(config.storage_timeout, Duration::from_secs(2));
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_age = 10").unwrap();
        let err = ProbeConfig::load(Some(file.path()), no_env, &ProbeOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ProbeConfig::load(
            Some(Path::new("/nonexistent/streamprobe.toml")),
            no_env,
            &ProbeOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn overrides_win_over_everything() {
        let env = env_from(&[("STORAGE_ENDPOINT", "minio:9000")]);
        let overrides = ProbeOverrides {
            checkpoint_path: Some(PathBuf::from("/tmp/ckpt.json")),
            max_age_secs: Some(60),
            process_pattern: Some("worker".to_string()),
            process_name: Some("Worker".to_string()),
            storage_timeout_secs: Some(1),
            skip_storage: true,
        };
        let config = ProbeConfig::load(None, env, &overrides).unwrap();
        assert_eq!(config.checkpoint_path, PathBuf::from("/tmp/ckpt.json"));
        assert_eq!(config.freshness_threshold_secs, 60);
        assert_eq!(config.process_pattern, "worker");
        assert_eq!(config.process_name, "Worker");
        assert_eq!(config.storage_timeout, Duration::from_secs(1));
        assert!(config.storage.is_none());
    }

    #[test]
    fn validate_rejects_bad_pattern() {
        let overrides = ProbeOverrides {
            process_pattern: Some("streaming_(".to_string()),
            ..Default::default()
        };
        let err = ProbeConfig::load(None, no_env, &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern(_)));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let overrides = ProbeOverrides {
            max_age_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ProbeConfig::load(None, no_env, &overrides),
            Err(ConfigError::Zero("max age"))
        ));

        let overrides = ProbeOverrides {
            storage_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ProbeConfig::load(None, no_env, &overrides),
            Err(ConfigError::Zero("storage timeout"))
        ));
    }

    #[test]
    fn validate_rejects_https_endpoint() {
        let env = env_from(&[("STORAGE_ENDPOINT", "https://s3.example.com")]);
        let err = ProbeConfig::load(None, env, &ProbeOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(s) if s == "https"));
    }

    #[test]
    fn validate_rejects_empty_bucket() {
        let env = env_from(&[("STORAGE_ENDPOINT", "minio:9000"), ("BUCKET_NAME", " ")]);
        let err = ProbeConfig::load(None, env, &ProbeOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyBucket));
    }

    #[test]
    fn authority_strips_http_scheme() {
        let storage = StorageConfig {
            endpoint: "http://minio:9000/".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: "b".to_string(),
        };
        assert_eq!(storage.authority().unwrap(), "minio:9000");
        assert!(!storage.has_credentials());
    }

    #[test]
    fn authority_rejects_paths() {
        let storage = StorageConfig {
            endpoint: "minio:9000/prefix".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: "b".to_string(),
        };
        assert!(matches!(storage.authority(), Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn debug_redacts_secret_key() {
        let storage = StorageConfig {
            endpoint: "minio:9000".to_string(),
            access_key: "ak".to_string(),
            secret_key: "super-secret".to_string(),
            bucket: "b".to_string(),
        };
        let rendered = format!("{storage:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
