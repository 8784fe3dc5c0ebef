//! Carsweep main entry point
//!
//! This is the command-line interface for the Carsweep listing harvester.

use carsweep::config::{load_config_with_hash, validate, Config, CrawlMode};
use carsweep::crawler::Coordinator;
use carsweep::SweepError;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Carsweep: a resilient vehicle listing harvester
///
/// Carsweep walks the listing pages of a classifieds site, fetches every ad
/// it has not stored before, and upserts the extracted records into SQLite.
/// Identities and proxies rotate as the site pushes back.
#[derive(Parser, Debug)]
#[command(name = "carsweep")]
#[command(version = "1.0.0")]
#[command(about = "A resilient vehicle listing harvester", long_about = None)]
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

    /// Override the configured crawl mode (full or incremental)
    #[arg(long, value_name = "MODE")]
    mode: Option<CrawlMode>,

    /// Override the configured listing page limit
    #[arg(long, value_name = "N")]
    max_pages: Option<u32>,

    /// Validate config and show the session plan without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(mode) = cli.mode {
        config.crawler.mode = mode;
    }
    if let Some(max_pages) = cli.max_pages {
        config.crawler.max_pages = max_pages;
    }
    validate(&config)?;

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("carsweep=info,warn"),
            1 => EnvFilter::new("carsweep=debug,info"),
            2 => EnvFilter::new("carsweep=trace,debug"),
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

/// Handles the --dry-run mode: shows the session a crawl would start
fn handle_dry_run(config: &Config) {
    println!("=== Carsweep Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Site: {}", config.crawler.site);
    println!("  Mode: {}", config.crawler.mode);
    println!("  Max pages: {}", config.crawler.max_pages);
    if config.crawler.mode == CrawlMode::Incremental {
        println!(
            "  Empty page threshold: {}",
            config.crawler.empty_page_threshold
        );
    }
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  Stall timeout: {}s", config.crawler.stall_timeout_secs);
    if let Some(base) = &config.crawler.base_url {
        println!("  Base URL: {}", base);
    }

    println!("\nRetry:");
    println!(
        "  Backoff: {}ms .. {}ms (jitter {})",
        config.retry.base_delay_ms, config.retry.max_delay_ms, config.retry.jitter
    );
    if config.retry.max_attempts == 0 {
        println!("  Max attempts: unlimited");
    } else {
        println!("  Max attempts: {}", config.retry.max_attempts);
    }

    println!("\nIdentity:");
    if config.identity.user_agents.is_empty() {
        println!("  User agents: built-in defaults");
    } else {
        println!("  User agents: {}", config.identity.user_agents.len());
    }
    println!("  Exclude mobile: {}", config.identity.exclude_mobile);

    println!("\nProxies:");
    if config.proxy.enabled {
        println!("  Paid: {}", config.proxy.paid.len());
        println!("  Free sources ({}):", config.proxy.sources.len());
        for source in &config.proxy.sources {
            println!("    * {:?}: {}", source.kind, source.url);
        }
        println!("  Max free proxies: {}", config.proxy.max_free_proxies);
    } else {
        println!("  Disabled (direct connections)");
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Batch size: {}", config.output.batch_size);

    if !config.enrichment.trims.is_empty() {
        println!("\nTrim catalog: {} entries", config.enrichment.trims.len());
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use carsweep::output::{load_statistics, print_statistics};
    use carsweep::storage::open_storage;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String) -> Result<(), Box<dyn std::error::Error>> {
    use carsweep::output::print_report;

    tracing::info!(
        "Harvesting {} in {} mode (max {} pages)",
        config.crawler.site,
        config.crawler.mode,
        config.crawler.max_pages
    );

    let stall_secs = config.crawler.stall_timeout_secs;
    let coordinator = match Coordinator::new(config, config_hash) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!("Failed to start crawl: {}", e);
            return Err(e.into());
        }
    };

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl");
            cancel.cancel();
        }
    });

    let report = match coordinator.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    print_report(&report);

    if report.is_error() {
        tracing::error!("Crawl stalled after {}s without progress", stall_secs);
        return Err(SweepError::Stalled {
            idle_secs: stall_secs,
        }
        .into());
    }

    tracing::info!("Crawl finished: {}", report.stop_reason);
    Ok(())
}
