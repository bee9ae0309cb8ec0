//! The health evaluator: ordered, fail-fast composition of the checks.

use std::fmt;
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use streamprobe_core::{ConfigResult, ProbeConfig};

use crate::checker::{
    Failure, ProcessTable, SystemProcessTable, check_checkpoint_freshness, check_process_liveness,
};
use crate::storage::{BucketProbe, S3BucketProbe};

/// Binary outcome of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of one evaluation. Unhealthy verdicts carry the first failure.
#[derive(Debug)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy(Failure),
}

impl HealthVerdict {
    pub fn status(&self) -> HealthStatus {
        match self {
            HealthVerdict::Healthy => HealthStatus::Healthy,
            HealthVerdict::Unhealthy(_) => HealthStatus::Unhealthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            HealthVerdict::Healthy => None,
            HealthVerdict::Unhealthy(failure) => Some(failure),
        }
    }

    /// Container health-check convention: 0 healthy, 1 unhealthy.
    pub fn exit_code(&self) -> u8 {
        match self {
            HealthVerdict::Healthy => 0,
            HealthVerdict::Unhealthy(_) => 1,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            HealthVerdict::Healthy => "All checks passed".to_string(),
            HealthVerdict::Unhealthy(failure) => failure.to_string(),
        }
    }
}

impl From<Failure> for HealthVerdict {
    fn from(failure: Failure) -> Self {
        HealthVerdict::Unhealthy(failure)
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthVerdict::Healthy => write!(f, "HEALTHY: {}", self.reason()),
            HealthVerdict::Unhealthy(failure) => write!(f, "UNHEALTHY: {failure}"),
        }
    }
}

/// Runs checkpoint, process, and storage checks in that order and stops at
/// the first failure.
pub struct HealthEvaluator<P = SystemProcessTable, B = S3BucketProbe> {
    config: ProbeConfig,
    pattern: Regex,
    processes: P,
    storage: B,
}

impl HealthEvaluator {
    /// Evaluator backed by the host process table and an S3 client.
    pub fn new(config: ProbeConfig) -> ConfigResult<Self> {
        let storage = S3BucketProbe::new(config.storage_timeout);
        Self::with_parts(config, SystemProcessTable, storage)
    }
}

impl<P: ProcessTable, B: BucketProbe> HealthEvaluator<P, B> {
    pub fn with_parts(config: ProbeConfig, processes: P, storage: B) -> ConfigResult<Self> {
        let pattern = config.process_regex()?;
        Ok(Self {
            config,
            pattern,
            processes,
            storage,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub async fn evaluate(&self) -> HealthVerdict {
        self.evaluate_at(SystemTime::now()).await
    }

    /// Evaluate with `now` as the reference time for checkpoint age.
    pub async fn evaluate_at(&self, now: SystemTime) -> HealthVerdict {
        match self.run_checks(now).await {
            Ok(()) => {
                debug!("all checks passed");
                HealthVerdict::Healthy
            }
            Err(failure) => {
                warn!(kind = ?failure.kind(), reason = %failure, "health check failed");
                HealthVerdict::Unhealthy(failure)
            }
        }
    }

    async fn run_checks(&self, now: SystemTime) -> Result<(), Failure> {
        let age = check_checkpoint_freshness(
            &self.config.checkpoint_path,
            self.config.freshness_threshold(),
            now,
        )?;
        debug!(
            path = %self.config.checkpoint_path.display(),
            age_secs = age.as_secs(),
            "checkpoint fresh"
        );

        let process = check_process_liveness(
            &self.processes,
            &self.pattern,
            &self.config.process_name,
        )?;
        debug!(pid = process.pid, name = %process.name, "pipeline process found");

        match &self.config.storage {
            Some(storage) => {
                self.storage.check_bucket(storage).await?;
                debug!(bucket = %storage.bucket, "bucket reachable");
            }
            None => debug!("storage not configured, skipping bucket check"),
        }

        Ok(())
    }
}
