//! streamprobe — container health check for the streaming pipeline.
//!
//! Prints one verdict line to stdout and exits `0` (healthy) or `1`
//! (unhealthy). Logs go to stderr; set `RUST_LOG` to change verbosity.
//!
//! # Usage
//!
//! ```text
//! HEALTHCHECK --interval=60s --timeout=10s CMD ["streamprobe"]
//! streamprobe --checkpoint /app/data/checkpoints/streaming_checkpoint.json --max-age 300
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use streamprobe_core::{ConfigError, ProbeConfig, ProbeOverrides};
use streamprobe_health::{Failure, HealthEvaluator, HealthVerdict};

mod output;

use output::OutputFormat;

const DEFAULT_LOG_FILTER: &str = "warn,streamprobe=info";

#[derive(Parser)]
#[command(
    name = "streamprobe",
    about = "Liveness probe for a checkpointing stream pipeline",
    version
)]
struct Cli {
    /// TOML config file. Environment variables and flags take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint file whose modification time marks pipeline progress.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Maximum checkpoint age in seconds (inclusive).
    #[arg(long, value_name = "SECS")]
    max_age: Option<u64>,

    /// Regular expression matched against process command lines.
    #[arg(long)]
    process_pattern: Option<String>,

    /// Process name used in the "not running" reason.
    #[arg(long)]
    process_name: Option<String>,

    /// Timeout for the storage bucket check, in seconds.
    #[arg(long, value_name = "SECS")]
    storage_timeout: Option<u64>,

    /// Skip the storage check even if STORAGE_ENDPOINT is set.
    #[arg(long)]
    skip_storage: bool,

    /// Output format for the verdict line.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Cli {
    fn overrides(&self) -> ProbeOverrides {
        ProbeOverrides {
            checkpoint_path: self.checkpoint.clone(),
            max_age_secs: self.max_age,
            process_pattern: self.process_pattern.clone(),
            process_name: self.process_name.clone(),
            storage_timeout_secs: self.storage_timeout,
            skip_storage: self.skip_storage,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            // clap exits with 2, which container runtimes reserve.
            let _ = e.print();
            let verdict = argument_error(&e);
            println!("{}", output::render(&verdict, OutputFormat::Text));
            return ExitCode::from(verdict.exit_code());
        }
    };

    if let Err(e) = init_tracing() {
        eprintln!("streamprobe: logging disabled: {e}");
    }

    let verdict = run(&cli).await;
    println!("{}", output::render(&verdict, cli.format));
    ExitCode::from(verdict.exit_code())
}

/// Unhealthy verdict for a rejected command line, reported with the first
/// line of clap's diagnostic.
fn argument_error(e: &clap::Error) -> HealthVerdict {
    let rendered = e.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    let message = first.strip_prefix("error: ").unwrap_or(first).trim();
    Failure::from(ConfigError::Arguments(message.to_string())).into()
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

async fn run(cli: &Cli) -> HealthVerdict {
    let config = match ProbeConfig::load(
        cli.config.as_deref(),
        |key| std::env::var(key).ok(),
        &cli.overrides(),
    ) {
        Ok(config) => config,
        Err(e) => return Failure::from(e).into(),
    };
    debug!(?config, "configuration resolved");

    match HealthEvaluator::new(config) {
        Ok(evaluator) => evaluator.evaluate().await,
        Err(e) => Failure::from(e).into(),
    }
}
