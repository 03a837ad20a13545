//! STRATA CLI
//!
//! Plans and runs operation batches from JSON files against a simulated
//! execution routine.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod simulate;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Deserialize;
use simulate::SimulatedHandler;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::Operation;
use strata_plan::{OperationPlanner, validate_dependencies};
use strata_runtime::{
    CancellationToken, ExecuteOptions, ExecutionEngine, StrataConfig, WorkerPool,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "STRATA - dependency-aware parallel batch execution", long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `strata_runtime=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch
    Run {
        /// Path to the batch file
        #[arg(short, long)]
        batch: PathBuf,
        /// Path to a config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Concurrent execution slots
        #[arg(long)]
        max_workers: Option<usize>,
        /// Operations allowed to wait for a slot
        #[arg(long)]
        queue_size: Option<usize>,
        /// Per-operation deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Stop after the first failed stage
        #[arg(long)]
        fail_fast: bool,
        /// Simulated duration for operations without `simulateMs`
        #[arg(long, default_value_t = 0)]
        default_delay_ms: u64,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Print the execution plan for a batch
    Plan {
        /// Path to the batch file
        #[arg(short, long)]
        batch: PathBuf,
    },
    /// List dependency problems in a batch without planning it
    Check {
        /// Path to the batch file
        #[arg(short, long)]
        batch: PathBuf,
    },
    /// Print the effective configuration
    Config {
        /// Path to a config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// A batch file holds either a bare list or `{ "operations": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    List(Vec<Operation>),
    Wrapped { operations: Vec<Operation> },
}

fn load_batch(path: &Path) -> Result<Vec<Operation>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading batch {}", path.display()))?;
    let batch: BatchFile = serde_json::from_str(&text)
        .wrap_err_with(|| format!("parsing batch {}", path.display()))?;
    Ok(match batch {
        BatchFile::List(operations) | BatchFile::Wrapped { operations } => operations,
    })
}

fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    match path {
        Some(path) => Ok(StrataConfig::from_path(path)?),
        None => Ok(StrataConfig::default()),
    }
}

fn init_tracing(log_level: Option<&str>, json: bool) {
    let filter = match log_level {
        Some(level) if level.contains('=') => EnvFilter::new(level),
        Some(level) => EnvFilter::new(format!("strata={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn progress_bar(total: usize, hidden: bool) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total as u64);
    if hidden {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

#[allow(clippy::too_many_arguments)]
async fn run(
    batch: &Path,
    config: Option<&Path>,
    max_workers: Option<usize>,
    queue_size: Option<usize>,
    timeout_ms: Option<u64>,
    fail_fast: bool,
    default_delay_ms: u64,
    no_progress: bool,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(max) = max_workers {
        config.pool.max_workers = max;
    }
    if let Some(size) = queue_size {
        config.pool.queue_size = size;
    }
    if let Some(ms) = timeout_ms {
        config.pool.worker_timeout = Duration::from_millis(ms);
    }
    if fail_fast {
        config.continue_on_error = false;
    }
    config.validate()?;

    let operations = load_batch(batch)?;
    let handler = SimulatedHandler {
        default_delay: Duration::from_millis(default_delay_ms),
    };
    let pool = WorkerPool::new(config.pool, handler)?;
    let engine = ExecutionEngine::new(pool.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let bar = progress_bar(operations.len(), no_progress)?;
    let options = ExecuteOptions::from_config(&config)
        .with_cancel(cancel)
        .with_progress({
            let bar = bar.clone();
            move |progress| bar.set_position(progress.completed_operations as u64)
        });

    let outcome = engine.execute(operations, options).await;
    bar.finish_and_clear();

    let report = pool.shutdown(Duration::from_secs(5)).await;
    tracing::debug!(?report, stats = ?pool.stats(), "pool stopped");

    match outcome {
        Ok(results) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            let failed = results.iter().filter(|r| r.is_failed()).count();
            if failed > 0 {
                return Err(eyre!("{failed} operation(s) failed"));
            }
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(err.results())?);
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.json_logs);

    match cli.command {
        Commands::Run {
            batch,
            config,
            max_workers,
            queue_size,
            timeout_ms,
            fail_fast,
            default_delay_ms,
            no_progress,
        } => {
            run(
                &batch,
                config.as_deref(),
                max_workers,
                queue_size,
                timeout_ms,
                fail_fast,
                default_delay_ms,
                no_progress,
            )
            .await
        }
        Commands::Plan { batch } => {
            let operations = load_batch(&batch)?;
            let plan = OperationPlanner::new().create_execution_plan(&operations)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Commands::Check { batch } => {
            let operations = load_batch(&batch)?;
            let issues = validate_dependencies(&operations);
            for issue in &issues {
                println!("{issue}");
            }
            if issues.is_empty() {
                println!("{} operation(s), no dependency problems", operations.len());
                Ok(())
            } else {
                Err(eyre!("{} dependency problem(s)", issues.len()))
            }
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
