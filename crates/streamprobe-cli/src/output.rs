//! Verdict rendering for stdout.

use clap::ValueEnum;
use serde::Serialize;

use streamprobe_health::{FailureKind, HealthStatus, HealthVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `HEALTHY: ...` / `UNHEALTHY: ...`
    Text,
    /// One-line JSON object.
    Json,
}

#[derive(Serialize)]
struct Report {
    status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<FailureKind>,
    reason: String,
}

/// The single line printed for a verdict.
pub fn render(verdict: &HealthVerdict, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => single_line(&verdict.to_string()),
        OutputFormat::Json => {
            let report = Report {
                status: verdict.status(),
                check: verdict.failure().map(|f| f.kind()),
                reason: single_line(&verdict.reason()),
            };
            serde_json::to_string(&report).unwrap_or_else(|_| single_line(&verdict.to_string()))
        }
    }
}

/// Parser diagnostics span several lines; the verdict must not.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
