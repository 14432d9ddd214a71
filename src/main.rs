//! Spindle main entry point
//!
//! This is the command-line interface for the Spindle crawl scheduler.

use clap::Parser;
use spindle::config::{load_config_with_hash, Config};
use spindle::Crawler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Spindle: a crawl scheduler over a shared task queue
///
/// Spindle seeds a persistent task queue from the configuration and runs
/// workers that fetch each task, follow the links its document type selects,
/// and schedule the results. Several processes may share one queue.
#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version)]
#[command(about = "A crawl scheduler over a shared task queue", long_about = None)]
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

    /// Override the configured number of workers
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=100))]
    workers: Option<u32>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "clear", "probe"])]
    dry_run: bool,

    /// Show queue statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "clear", "probe"])]
    stats: bool,

    /// Drop every task and crawl timestamp of the queue and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "probe"])]
    clear: bool,

    /// Fetch one URL, print the tasks its handler would emit, and exit
    #[arg(long, value_name = "URL", requires = "document_type")]
    probe: Option<String>,

    /// Document type used with --probe
    #[arg(long = "as", value_name = "TYPE", requires = "probe")]
    document_type: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config).await?;
    } else if cli.clear {
        handle_clear(&config).await?;
    } else if let (Some(url), Some(document_type)) = (cli.probe, cli.document_type) {
        handle_probe(&config, &url, &document_type).await?;
    } else {
        handle_crawl(&config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spindle=info,warn"),
            1 => EnvFilter::new("spindle=debug,info"),
            2 => EnvFilter::new("spindle=trace,debug"),
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

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    println!("=== Spindle Dry Run ===\n");

    println!("Queue:");
    println!("  Name: {}", config.queue.name);
    println!("  Backend: {:?}", config.queue.backend);
    if let Some(path) = &config.queue.sqlite_path {
        println!("  SQLite path: {}", path);
    }
    if let Some(url) = &config.queue.redis_url {
        println!("  Redis URL: {}", url);
    }
    println!("  Canonicalize URLs: {}", config.queue.canonicalize);

    println!("\nWorkers:");
    println!("  Count: {}", config.workers.count);
    println!("  Poll interval: {}ms", config.workers.poll_interval_ms);
    println!("  Request delay: {}ms", config.workers.request_delay_ms);
    println!("  Fetch timeout: {}s", config.workers.fetch_timeout_secs);

    println!("\nDocument Types ({}):", config.document_types.len());
    for entry in &config.document_types {
        println!("  - {}", entry.name);
        for rule in &entry.follow {
            println!("    * {} -> {}", rule.selector, rule.document_type);
        }
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        let repeat = seed
            .interval_secs
            .map(|secs| format!(", every {}s", secs))
            .unwrap_or_default();
        println!("  - {} as {}{}", seed.url, seed.document_type, repeat);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows how many tasks are waiting
async fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let crawler = Crawler::open(config).await?;
    let queue = Arc::clone(crawler.queue());
    let stats = tokio::task::spawn_blocking(move || queue.stats()).await??;

    println!("Queue: {}\n", config.queue.name);
    println!("  High priority: {}", stats.priority_ready);
    println!("  Normal:        {}", stats.normal_ready);
    println!("  Total:         {}", stats.total());

    Ok(())
}

/// Handles the --clear mode: drops the whole queue
async fn handle_clear(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let crawler = Crawler::open(config).await?;
    let queue = Arc::clone(crawler.queue());
    let removed = tokio::task::spawn_blocking(move || queue.clear()).await??;

    println!("✓ Cleared queue '{}' ({} keys removed)", config.queue.name, removed);

    Ok(())
}

/// Handles the --probe mode: shows what one document would emit
async fn handle_probe(
    config: &Config,
    url: &str,
    document_type: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let crawler = Crawler::open(config).await?;
    let tasks = crawler.probe(url, document_type).await?;

    println!("{} as {} emits {} task(s):", url, document_type, tasks.len());
    for task in &tasks {
        println!(
            "  - {} as {}",
            task.url(),
            task.document_type_name().unwrap_or("<unresolved>")
        );
    }

    Ok(())
}

/// Handles the main crawl operation: seed, then work until Ctrl-C
async fn handle_crawl(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (mut crawler, enqueued) = Crawler::open_seeded(config).await?;

    tracing::info!(
        workers = config.workers.count,
        seeds_enqueued = enqueued,
        "Crawling; press Ctrl-C to stop"
    );

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    match crawler.run_until(stop).await {
        Ok(stats) => {
            tracing::info!(
                processed = stats.tasks_processed,
                failed = stats.tasks_failed,
                emitted = stats.tasks_emitted,
                dropped = stats.pushes_dropped,
                "Crawl stopped"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
