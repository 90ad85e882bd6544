//! CLI command definitions for termbench.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::execution::DockerRuntime;
use crate::messenger::A2aMessenger;
use crate::metrics::{export_metrics, init_metrics, BenchmarkReport};
use crate::runner::{Evaluator, EvaluatorConfig, Orchestrator, SandboxManager};
use crate::task::{TaskLoader, TaskSource};

/// Terminal agent benchmark evaluator.
#[derive(Parser)]
#[command(name = "termbench")]
#[command(about = "Evaluate terminal agents on sandboxed benchmark tasks")]
#[command(version)]
#[command(
    long_about = "termbench sends benchmark tasks to a participant agent, executes the commands it asks for inside resource-capped Docker sandboxes, and verifies the final state with each task's verification script.\n\nExample usage:\n  termbench run --participant-url http://localhost:9019 --dataset ./tasks --output report.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate a participant agent on a dataset.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// List the tasks of a dataset.
    Tasks(TasksArgs),
}

/// Arguments for `termbench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// URL of the participant agent's JSON-RPC endpoint.
    #[arg(short = 'p', long, env = "TERMBENCH_PARTICIPANT_URL")]
    pub participant_url: String,

    /// Dataset name, task file or task directory.
    #[arg(short = 'd', long)]
    pub dataset: Option<String>,

    /// Maximum executed commands per task.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Wall-clock budget per task, in seconds.
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Number of tasks evaluated at once.
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// YAML configuration file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the JSON report to this file.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Print the JSON report instead of the summary.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `termbench tasks`.
#[derive(Parser, Debug)]
pub struct TasksArgs {
    /// Dataset name, task file or task directory.
    #[arg(short = 'd', long, env = "TERMBENCH_DATASET", default_value = crate::runner::DEFAULT_DATASET)]
    pub dataset: String,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evaluation_command(args).await,
        Commands::Tasks(args) => run_tasks_command(args).await,
    }
}

/// Resolves the configuration: file or defaults, then environment, then flags.
fn resolve_config(args: &RunArgs) -> anyhow::Result<EvaluatorConfig> {
    let base = match &args.config {
        Some(path) => EvaluatorConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EvaluatorConfig::default(),
    };

    let mut config = base.apply_env()?;
    if let Some(dataset) = &args.dataset {
        config.dataset = dataset.clone();
    }
    if let Some(max_turns) = args.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(task_timeout) = args.task_timeout {
        config = config.with_task_timeout(Duration::from_secs(task_timeout));
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    config.validate()?;
    Ok(config)
}

async fn run_evaluation_command(args: RunArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let runtime = DockerRuntime::connect().context("Docker is required to run evaluations")?;
    let sandboxes = Arc::new(
        SandboxManager::new(Arc::new(runtime))
            .with_limits(config.limits.clone())
            .with_stop_grace(config.stop_grace())
            .with_setup_timeout(config.setup_timeout()),
    );
    let messenger = Arc::new(A2aMessenger::new(&args.participant_url)?);
    let evaluator = Evaluator::new(sandboxes, messenger, &config);
    let orchestrator = Orchestrator::new(Arc::new(TaskLoader::new(&config.dataset)), evaluator)
        .with_concurrency(config.concurrency);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling evaluation");
                cancel.cancel();
            }
        })
    };

    info!(
        participant = %args.participant_url,
        dataset = %config.dataset,
        max_turns = config.max_turns,
        "Running evaluation"
    );
    let outcome = orchestrator.run(cancel).await;
    ctrl_c.abort();
    orchestrator.shutdown().await;
    let report = outcome?;

    if let Some(path) = &args.output {
        write_report(&report, path)?;
        info!(path = %path.display(), "Report written");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for result in &report.results {
            let mark = if result.passed { "PASS" } else { "FAIL" };
            println!(
                "  [{mark}] {} turns={} time={:.1}s",
                result.task_id, result.turns, result.total_time
            );
            if let Some(err) = &result.error {
                println!("    error: {err}");
            }
        }
    }

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

fn write_report(report: &BenchmarkReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct TaskListing {
    id: String,
    image: String,
    working_directory: String,
    setup_commands: usize,
    tags: Vec<String>,
}

async fn run_tasks_command(args: TasksArgs) -> anyhow::Result<()> {
    let loader = TaskLoader::new(&args.dataset);
    let tasks = loader.load_tasks().await?;

    let listing: Vec<TaskListing> = tasks
        .iter()
        .map(|task| TaskListing {
            id: task.id.clone(),
            image: task.image.clone(),
            working_directory: task.working_directory.clone(),
            setup_commands: task.setup_commands.len(),
            tags: task.tags.iter().cloned().collect(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Dataset: {} ({} tasks)", loader.name(), listing.len());
    for task in &listing {
        println!("  {:<24} {:<20} setup={}", task.id, task.image, task.setup_commands);
    }
    Ok(())
}
