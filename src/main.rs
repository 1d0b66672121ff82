use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace};

use indexsync::bootstrap::{self, RunOverrides};
use indexsync::{SyncConfig, SyncError};

/// Keep a search index in sync with a relational table
#[derive(Parser)]
#[command(name = "indexsync")]
#[command(about = "Incremental, resumable table-to-search-index sync", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job once, resuming from its save point
    Run {
        /// Path to the job configuration file
        #[arg(short = 'c', long)]
        config: PathBuf,

        /// Stop after this many committed pages
        #[arg(long)]
        max_pages: Option<usize>,

        /// Records per page
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Print the persisted save point as JSON
    Status {
        #[arg(short = 'c', long)]
        config: PathBuf,
    },
    /// Delete the persisted save point so the next run starts over
    Reset {
        #[arg(short = 'c', long)]
        config: PathBuf,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Load and validate a configuration file
    Validate {
        #[arg(short = 'c', long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,sqlx=debug,hyper=debug,reqwest=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .with_writer(std::io::stderr)
        .init();

    debug!("indexsync started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run {
            config,
            max_pages,
            page_size,
        } => {
            run_job(
                config,
                RunOverrides {
                    page_size,
                    max_pages,
                },
            )
            .await
        }
        Commands::Status { config } => show_status(config).await,
        Commands::Reset { config, yes } => reset_job(config, yes).await,
        Commands::Validate { config } => validate_config(config).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<SyncError>()
            .map(SyncError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn load_config(path: &Path) -> anyhow::Result<SyncConfig> {
    let config = SyncConfig::load(path).await?;
    config.validate()?;
    Ok(config)
}

async fn run_job(path: PathBuf, overrides: RunOverrides) -> anyhow::Result<()> {
    let config = SyncConfig::load(&path).await?;
    let mut job = bootstrap::build_job(&config, &overrides).await?;
    let report = job.run().await?;

    if !report.skipped_ids.is_empty() {
        info!(
            "Skipped {} records: {}",
            report.records_skipped,
            report.skipped_ids.join(", ")
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render run report")?
    );
    Ok(())
}

async fn show_status(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path).await?;
    let mut service = bootstrap::save_point_service(&config).await?;
    let save_point = service.load_save_point().await?;
    let store = service.store_health().await?;

    let status = json!({
        "job": config.job.name,
        "mode": config.job.mode,
        "save_point": save_point,
        "records_indexed": service.records_indexed(),
        "store": store,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn reset_job(path: PathBuf, yes: bool) -> anyhow::Result<()> {
    let config = load_config(&path).await?;
    if !yes && !confirm(&format!(
        "Reset save point of job '{}'? The next run re-indexes everything. [y/N] ",
        config.job.name
    ))? {
        println!("Aborted");
        return Ok(());
    }

    let mut service = bootstrap::save_point_service(&config).await?;
    if service.reset().await? {
        println!("Save point of job '{}' removed", config.job.name);
    } else {
        println!("Job '{}' has no save point", config.job.name);
    }
    Ok(())
}

async fn validate_config(path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&path).await?;
    println!(
        "Configuration OK: job '{}' ({} mode) {} -> {}",
        config.job.name, config.job.mode, config.source.table, config.index.name
    );
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    use std::io::Write;

    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
