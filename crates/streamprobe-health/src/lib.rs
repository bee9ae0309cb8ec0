//! streamprobe-health — liveness evaluation for a checkpointing stream job.
//!
//! Runs three gates in order and stops at the first failure:
//!
//! ```text
//! HealthEvaluator::evaluate()
//!   ├── check_checkpoint_freshness()  → CheckpointMissing | CheckpointStale
//!   ├── check_process_liveness()      → ProcessNotRunning
//!   └── BucketProbe::check_bucket()   → StorageUnreachable   (only if configured)
//! ```
//!
//! The result is a [`HealthVerdict`]. Translating it into an exit code and
//! an output line is left to the binary.
//!
//! Each evaluation is independent: no state is carried between invocations
//! and nothing is retried.

pub mod checker;
pub mod evaluator;
pub mod storage;

pub use checker::{Failure, FailureKind, ProcessEntry, ProcessTable, SystemProcessTable};
pub use evaluator::{HealthEvaluator, HealthStatus, HealthVerdict};
pub use storage::{BucketProbe, S3BucketProbe, StorageError, StorageResult};
