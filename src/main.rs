use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use copilot_bench::agent::{CopilotSettings, CopilotStudioClient, TokenProvider};
use copilot_bench::checkpoint::read_checkpoint;
use copilot_bench::config::{expand_path, Config};
use copilot_bench::dashboard::{
    render_outcome_table, render_planner_table, render_run_list, render_stats, Dashboard,
};
use copilot_bench::observability::LogObserver;
use copilot_bench::replay::accumulator::RunSummary;
use copilot_bench::replay::{snapshot_channel, ReplayLoop, RunOptions};
use copilot_bench::telemetry::store::DB_FILE;
use copilot_bench::telemetry::{ArchiveObserver, ArchiveReader, RunArchiveStore};

#[derive(Parser, Debug)]
#[command(name = "copilot-bench")]
#[command(author, version, about = "Replay a query file against a Copilot Studio agent and measure it")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay every query in the input file
    Run {
        /// Query file, one query per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for CSV checkpoints
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Print latency statistics for a checkpoint CSV
    Summarize {
        /// Checkpoint file written by `run`
        csv: PathBuf,
    },

    /// List archived runs, or show one run
    Report {
        /// Archive database (defaults to the configured archive directory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Run id to show
        #[arg(long, conflicts_with = "latest")]
        run: Option<String>,

        /// Show the most recently started run
        #[arg(long)]
        latest: bool,

        /// Runs to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print the JSON schema of the config file
    ConfigSchema,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match cli.command {
        Command::Run { input, output_dir } => run(config, input, output_dir).await,
        Command::Summarize { csv } => summarize(&config, &csv),
        Command::Report {
            db,
            run,
            latest,
            limit,
        } => report(&config, db, run, latest, limit),
        Command::ConfigSchema => {
            println!("{}", serde_json::to_string_pretty(&Config::json_schema())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr so the dashboard owns stdout. `RUST_LOG` wins over
/// the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(
    config: Config,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let input = input.unwrap_or_else(|| config.input_path());
    let mut options = RunOptions::from_config(&config);
    if let Some(dir) = output_dir {
        options.output_dir = dir;
    }

    let token = TokenProvider::from_config(&config.agent)?;
    let settings = CopilotSettings::from_config(&config.agent)?;
    let client = CopilotStudioClient::new(settings, &token)?;

    let mut replay =
        ReplayLoop::new(Arc::new(client), options).with_observer(Arc::new(LogObserver));

    let archive = if config.archive.enabled {
        let dir = config.archive_dir()?;
        let store = Arc::new(
            RunArchiveStore::open(&dir, config.archive.buffer_capacity)
                .context("opening run archive")?,
        );
        let observer = ArchiveObserver::start(store.clone(), &input);
        tracing::info!(run_id = observer.run_id(), db = %store.db_path().display(), "archiving run");
        replay = replay.with_observer(Arc::new(observer));
        Some(store)
    } else {
        None
    };

    let dashboard = Dashboard::new(config.dashboard.clone());
    let (tx, rx) = snapshot_channel(config.run.snapshot_capacity);

    let replay_task = async move {
        let report = replay.run(&input, &tx).await;
        // Closing the channel ends the dashboard loop.
        drop(tx);
        drop(replay);
        report
    };
    let (report, _) = tokio::join!(replay_task, dashboard.consume(rx));

    // Last reference: flushes pending archive writes.
    drop(archive);

    if report.end.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn summarize(config: &Config, csv: &std::path::Path) -> Result<ExitCode> {
    let outcomes = read_checkpoint(&expand_path(&csv.to_string_lossy()))?;
    println!("{}", style(csv.display()).bold());
    println!(
        "{}",
        render_stats(&RunSummary::compute(&outcomes), &config.dashboard)
    );
    if !outcomes.is_empty() {
        println!();
        println!("{}", render_outcome_table(&outcomes));
    }
    Ok(ExitCode::SUCCESS)
}

fn report(
    config: &Config,
    db: Option<PathBuf>,
    run_id: Option<String>,
    latest: bool,
    limit: usize,
) -> Result<ExitCode> {
    let db_path = match db {
        Some(path) => path,
        None => config.archive_dir()?.join(DB_FILE),
    };
    let reader = ArchiveReader::open(&db_path)?;

    let run_id = match run_id {
        Some(id) => Some(id),
        None if latest => Some(
            reader
                .latest_run_id()?
                .with_context(|| format!("no archived runs in {}", db_path.display()))?,
        ),
        None => None,
    };
    let Some(run_id) = run_id else {
        let runs = reader.list_runs(limit)?;
        if runs.is_empty() {
            println!("No archived runs in {}", db_path.display());
        } else {
            println!("{}", render_run_list(&runs));
        }
        return Ok(ExitCode::SUCCESS);
    };

    let outcomes = reader.export_outcomes(&run_id)?;
    let events = reader.export_planner_events(&run_id)?;
    println!("{}", style(format!("Run {run_id}")).bold());
    println!(
        "{}",
        render_stats(&RunSummary::compute(&outcomes), &config.dashboard)
    );
    if !outcomes.is_empty() {
        println!();
        println!("{}", render_outcome_table(&outcomes));
    }
    if !events.is_empty() {
        println!();
        println!("{}", render_planner_table(&events));
    }
    Ok(ExitCode::SUCCESS)
}
