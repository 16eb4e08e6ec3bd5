//! Feed-Harvest main entry point
//!
//! This is the command-line interface for the feed synchronization engine.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use feed_harvest::classifier::GeminiClassifier;
use feed_harvest::config::{load_config_with_hash, Config};
use feed_harvest::engine::{
    start_scheduler, ClassificationJob, ExtractionJob, JobOrchestrator, OrchestratorConfig,
    RateLimitGate, RetryLedger, ScheduledDriver, SyncDriver, SyncJob,
};
use feed_harvest::feed::{FacebookSource, FeedRegistry, InstagramSource};
use feed_harvest::storage::{SqliteStorage, Storage};
use feed_harvest::CycleState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Backoff recorded for an extraction rate limit without a hint
const EXTRACTION_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum JobSelection {
    Extraction,
    Classification,
    All,
}

impl JobSelection {
    fn extraction(self) -> bool {
        matches!(self, Self::Extraction | Self::All)
    }

    fn classification(self) -> bool {
        matches!(self, Self::Classification | Self::All)
    }
}

/// Feed-Harvest: incremental feed synchronization
///
/// Feed-Harvest periodically pulls new posts from the configured accounts,
/// stores them, and classifies unseen posts with an external model, honoring
/// retry budgets and rate limits across restarts.
#[derive(Parser, Debug)]
#[command(name = "feed-harvest")]
#[command(version)]
#[command(about = "Incremental feed synchronization and classification", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run one cycle of each selected job and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    once: bool,

    /// Which jobs to run
    #[arg(long, value_enum, default_value_t = JobSelection::All)]
    job: JobSelection,

    /// Validate config and show what would be synchronized
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.job);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_sync(config, config_hash, cli.job, cli.once).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("feed_harvest=info,warn"),
            1 => EnvFilter::new("feed_harvest=debug,info"),
            2 => EnvFilter::new("feed_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be synchronized
fn handle_dry_run(config: &Config, job: JobSelection) {
    println!("=== Feed-Harvest Dry Run ===\n");

    println!("Engine:");
    println!("  Server id: {}", config.engine.server_id);
    println!("  Chunk delay: {}ms", config.engine.chunk_delay_ms);
    println!("  Database: {}", config.storage.database_path);

    if job.extraction() {
        let extraction = &config.extraction;
        println!("\nExtraction:");
        println!("  Schedule: {}", extraction.schedule);
        println!("  Workers: {}", extraction.max_workers);
        println!("  Max retries: {}", extraction.max_retries);
        println!("  Lookback days: {}", extraction.lookback_days);
        println!("  Run on start: {}", extraction.run_on_start);

        println!("\nAccounts ({}):", config.accounts.len());
        for account in &config.accounts {
            println!("  - {}", account);
        }
    }

    if job.classification() {
        match &config.classification {
            Some(classification) => {
                println!("\nClassification:");
                println!("  Schedule: {}", classification.schedule);
                println!("  Workers: {}", classification.max_workers);
                println!("  Max retries: {}", classification.max_retries);
                println!("  Default backoff: {}ms", classification.default_backoff_ms);
                println!("  Model: {}", config.classifier.model);
            }
            None => println!("\nClassification: not configured"),
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use feed_harvest::output::{load_statistics, print_statistics};

    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Builds one driver per selected and configured job
fn build_drivers(
    config: &Config,
    config_hash: &str,
    selection: JobSelection,
    shutdown: &CancellationToken,
) -> anyhow::Result<Vec<ScheduledDriver>> {
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(Path::new(&config.storage.database_path))
            .context("failed to open database")?,
    );
    let chunk_delay = Duration::from_millis(config.engine.chunk_delay_ms);
    let mut drivers = Vec::new();

    if selection.extraction() {
        let mut registry = FeedRegistry::new();
        registry.register(Arc::new(InstagramSource::new(&config.instagram)?));
        registry.register(Arc::new(FacebookSource::new(&config.facebook)?));

        let job = ExtractionJob::new(
            registry,
            storage.clone(),
            config.accounts.clone(),
            config.extraction.lookback_days,
        );
        let orchestrator = JobOrchestrator::new(
            OrchestratorConfig {
                max_concurrency: config.extraction.max_workers as usize,
                max_retries: config.extraction.max_retries,
                chunk_delay,
                rate_limit_backoff: EXTRACTION_BACKOFF,
            },
            RetryLedger::new(
                storage.clone(),
                RetryLedger::scope_for(&config.engine.server_id, "extraction"),
            ),
            RateLimitGate::new(storage.clone()),
        );

        drivers.push(ScheduledDriver {
            driver: Arc::new(SyncDriver::new(
                SyncJob::Extraction(job),
                orchestrator,
                storage.clone(),
                config_hash,
                shutdown.clone(),
            )),
            schedule: config.extraction.schedule.clone(),
            run_on_start: config.extraction.run_on_start,
        });
    }

    if selection.classification() {
        match &config.classification {
            Some(classification) => {
                let classifier = Arc::new(GeminiClassifier::new(&config.classifier)?);
                let job = ClassificationJob::new(
                    classifier,
                    storage.clone(),
                    classification.credential.clone(),
                );
                let orchestrator = JobOrchestrator::new(
                    OrchestratorConfig {
                        max_concurrency: classification.max_workers as usize,
                        max_retries: classification.max_retries,
                        chunk_delay,
                        rate_limit_backoff: Duration::from_millis(
                            classification.default_backoff_ms,
                        ),
                    },
                    RetryLedger::new(
                        storage.clone(),
                        RetryLedger::scope_for(&config.engine.server_id, "classification"),
                    ),
                    RateLimitGate::new(storage.clone()),
                );

                drivers.push(ScheduledDriver {
                    driver: Arc::new(SyncDriver::new(
                        SyncJob::Classification(job),
                        orchestrator,
                        storage.clone(),
                        config_hash,
                        shutdown.clone(),
                    )),
                    schedule: classification.schedule.clone(),
                    run_on_start: classification.run_on_start,
                });
            }
            None if selection == JobSelection::Classification => {
                bail!("--job classification requires a [classification] section")
            }
            None => tracing::info!("Classification not configured, skipping"),
        }
    }

    Ok(drivers)
}

/// Runs the selected jobs once, or on their schedules until Ctrl-C
async fn handle_sync(
    config: Config,
    config_hash: String,
    selection: JobSelection,
    once: bool,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let drivers = build_drivers(&config, &config_hash, selection, &shutdown)?;

    if drivers.is_empty() {
        bail!("no jobs to run");
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight work");
            signal_token.cancel();
        }
    });

    if once {
        let mut fatal = 0;
        for entry in &drivers {
            if let Some(cycle) = entry.driver.tick().await {
                if cycle.state == CycleState::Fatal {
                    fatal += 1;
                }
            }
        }
        if fatal > 0 {
            bail!("{} cycle(s) ended fatally", fatal);
        }
        return Ok(());
    }

    let mut scheduler = start_scheduler(&drivers).await?;
    tracing::info!("Scheduler started with {} jobs, press Ctrl-C to stop", drivers.len());

    shutdown.cancelled().await;
    scheduler.shutdown().await?;
    for entry in &drivers {
        entry.driver.wait_idle().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
