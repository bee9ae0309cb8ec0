//! Local checks: checkpoint freshness and process liveness.
//!
//! Both are read-only. The checkpoint check stats one file; the process
//! check takes one snapshot of the OS process table.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;
use tracing::{debug, warn};

use streamprobe_core::ConfigError;

use crate::storage::StorageError;

/// Why an evaluation came out unhealthy. The `Display` text is the reason
/// printed after `UNHEALTHY: `.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("Checkpoint file not found")]
    CheckpointMissing { path: PathBuf },

    #[error("Checkpoint file too old ({}s)", .age.as_secs())]
    CheckpointStale { path: PathBuf, age: Duration },

    #[error("{name} process not running")]
    ProcessNotRunning { name: String },

    #[error("Storage check failed: {0}")]
    StorageUnreachable(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Tag of a [`Failure`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CheckpointMissing,
    CheckpointStale,
    ProcessNotRunning,
    StorageUnreachable,
    InvalidConfig,
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::CheckpointMissing { .. } => FailureKind::CheckpointMissing,
            Failure::CheckpointStale { .. } => FailureKind::CheckpointStale,
            Failure::ProcessNotRunning { .. } => FailureKind::ProcessNotRunning,
            Failure::StorageUnreachable(_) => FailureKind::StorageUnreachable,
            Failure::InvalidConfig(_) => FailureKind::InvalidConfig,
        }
    }
}

/// Confirm the checkpoint exists and was modified no more than `threshold`
/// before `now`. Returns the checkpoint age on success.
///
/// The bound is inclusive. An mtime later than `now` counts as age zero.
pub fn check_checkpoint_freshness(
    path: &Path,
    threshold: Duration,
    now: SystemTime,
) -> Result<Duration, Failure> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "checkpoint could not be inspected");
            }
            return Err(Failure::CheckpointMissing {
                path: path.to_path_buf(),
            });
        }
    };

    let modified = metadata.modified().map_err(|e| {
        warn!(path = %path.display(), error = %e, "checkpoint mtime unavailable");
        Failure::CheckpointMissing {
            path: path.to_path_buf(),
        }
    })?;

    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age > threshold {
        return Err(Failure::CheckpointStale {
            path: path.to_path_buf(),
            age,
        });
    }

    Ok(age)
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// Space-joined argv. Empty for zombies and kernel threads.
    pub cmdline: String,
}

impl ProcessEntry {
    /// `pgrep -f` style match: the pattern is searched in the full command
    /// line, falling back to the executable name when argv is unavailable.
    pub fn matches(&self, pattern: &Regex) -> bool {
        if self.cmdline.is_empty() {
            pattern.is_match(&self.name)
        } else {
            pattern.is_match(&self.cmdline)
        }
    }
}

/// Source of process-table snapshots.
pub trait ProcessTable {
    /// All processes visible to the caller, excluding the caller itself and
    /// a shell that launched it.
    fn snapshot(&self) -> Vec<ProcessEntry>;
}

/// The host's process table, read through `sysinfo`.
///
/// Threads are listed by `sysinfo` as separate entries carrying the
/// owner's argv; only thread-group leaders are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        let processes = system.processes();

        let own_pid = sysinfo::get_current_pid().ok();
        let wrapper_pid = own_pid
            .and_then(|pid| processes.get(&pid))
            .and_then(|own| {
                let parent_pid = own.parent()?;
                let parent = processes.get(&parent_pid)?;
                launched_by(&join_cmd(own.cmd()), &join_cmd(parent.cmd())).then_some(parent_pid)
            });

        processes
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(pid, _)| Some(**pid) != own_pid && Some(**pid) != wrapper_pid)
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cmdline: join_cmd(process.cmd()),
            })
            .collect()
    }
}

fn join_cmd(args: &[std::ffi::OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parent whose command line embeds ours is a wrapper such as
/// `/bin/sh -c "streamprobe ..."` from a shell-form `HEALTHCHECK`.
fn launched_by(own_cmdline: &str, parent_cmdline: &str) -> bool {
    !own_cmdline.is_empty() && parent_cmdline.contains(own_cmdline)
}

/// Confirm at least one process matches `pattern`. Presence only: a hung
/// or zombie process still passes.
pub fn check_process_liveness<P: ProcessTable>(
    table: &P,
    pattern: &Regex,
    name: &str,
) -> Result<ProcessEntry, Failure> {
    let processes = table.snapshot();
    let scanned = processes.len();

    match processes.into_iter().find(|p| p.matches(pattern)) {
        Some(process) => Ok(process),
        None => {
            debug!(pattern = %pattern, scanned, "no matching process");
            Err(Failure::ProcessNotRunning {
                name: name.to_string(),
            })
        }
    }
}
