//! spiderpool main entry point
//!
//! This is the command-line interface for the spiderpool crawler. The same
//! binary runs the primary (`spider`) and, re-executed by it, each worker.

use anyhow::Context;
use clap::{Parser, Subcommand};
use spiderpool::config::{load_config_with_hash, Config};
use spiderpool::crawler::{self, CrawlWorker};
use spiderpool::dispatch::{serve, ProcessLauncher};
use spiderpool::queue::PriorityRules;
use spiderpool::storage::{open_storage, Storage};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// spiderpool: a polite multi-process domain crawler
///
/// spiderpool keeps a durable queue of URLs in SQLite and crawls them with a
/// pool of worker processes, respecting robots.txt, request pacing and
/// per-domain policy.
#[derive(Parser, Debug)]
#[command(name = "spiderpool")]
#[command(version)]
#[command(about = "A polite multi-process domain crawler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the queue until it is empty or the process is interrupted
    Spider {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Number of workers (overrides the configuration)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run workers as tasks in this process instead of child processes
        #[arg(long)]
        in_process: bool,
    },

    /// Run as a worker over stdin/stdout (started by `spider`)
    #[command(hide = true)]
    Worker,

    /// Mark domains as ok to spider and queue their root pages
    Bless {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Domains to bless; read one per line from stdin when omitted
        #[arg(value_name = "DOMAIN")]
        domains: Vec<String>,
    },

    /// Recompute queue priorities with the current rules
    Reprioritize {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Show queue counts by priority
    Status {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List domains with queued URLs that have never been requested
    Unrequested {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Hostname patterns, `*` matches anything (default: all)
        #[arg(value_name = "PATTERN")]
        patterns: Vec<String>,
    },

    /// Print stored blobs (response bodies and headers) by id
    Blob {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Blob ids
        #[arg(value_name = "ID", required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Spider {
            config,
            workers,
            in_process,
        } => handle_spider(&config, workers, in_process, cli.verbose, cli.quiet).await,
        Command::Worker => handle_worker().await,
        Command::Bless { config, domains } => handle_bless(&config, domains),
        Command::Reprioritize { config } => handle_reprioritize(&config),
        Command::Status { config } => handle_status(&config),
        Command::Unrequested { config, patterns } => handle_unrequested(&config, &patterns),
        Command::Blob { config, ids } => handle_blob(&config, &ids),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs always go to stderr: a worker's stdout carries its messages.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spiderpool=info,warn"),
            1 => EnvFilter::new("spiderpool=debug,info"),
            2 => EnvFilter::new("spiderpool=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok(config)
}

/// Handles `spider`: runs the primary and its workers
async fn handle_spider(
    config_path: &Path,
    workers: Option<usize>,
    in_process: bool,
    verbose: u8,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut config = load(config_path)?;
    if workers.is_some() {
        config.spider.workers = workers;
    }

    let storage = open_storage(Path::new(&config.spider.database_file))
        .with_context(|| format!("Failed to open database {}", config.spider.database_file))?;

    let primary = if in_process {
        crawler::run_spider(config, storage, crawler::in_process_launcher(), true).await?
    } else {
        let launcher = ProcessLauncher::current_exe(worker_args(verbose, quiet))?;
        crawler::run_spider(config, storage, launcher, true).await?
    };

    let status = primary.storage().queue_status()?;
    tracing::info!(
        "Done. {} items processed, {} still pending",
        status.processed,
        status.pending()
    );
    Ok(())
}

/// Arguments for re-running this binary as a worker
fn worker_args(verbose: u8, quiet: bool) -> Vec<String> {
    let mut args = vec!["worker".to_string()];
    if quiet {
        args.push("--quiet".to_string());
    } else if verbose > 0 {
        args.push(format!("-{}", "v".repeat(verbose as usize)));
    }
    args
}

/// Handles `worker`: serves the primary over stdin/stdout until EOF
async fn handle_worker() -> anyhow::Result<()> {
    // The primary decides when workers stop, by closing their stdin
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Worker ignoring interrupt");
        }
    });

    serve(
        Arc::new(CrawlWorker::new()),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
    .context("Worker failed")
}

/// Handles `bless`: marks domains ok to spider and queues their roots
fn handle_bless(config_path: &Path, mut domains: Vec<String>) -> anyhow::Result<()> {
    let config = load(config_path)?;

    if domains.is_empty() {
        for line in std::io::stdin().lock().lines() {
            domains.push(line.context("Failed to read domains from stdin")?);
        }
    }

    let mut storage = open_storage(Path::new(&config.spider.database_file))?;
    let count = crawler::bless_domains(&mut storage, &domains)?;
    println!("Blessed {} domains", count);
    Ok(())
}

/// Handles `reprioritize`: recomputes priorities of unconsumed queue items
fn handle_reprioritize(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let rules = PriorityRules::compile(&config.priority)?;

    let mut storage = open_storage(Path::new(&config.spider.database_file))?;
    let changed = crawler::reprioritize(&mut storage, &rules)?;
    println!("Updated {} queue items", changed);
    Ok(())
}

/// Handles `status`: prints queue counts
fn handle_status(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let storage = open_storage(Path::new(&config.spider.database_file))?;
    let status = storage.queue_status()?;

    println!("=== Queue Status ===\n");
    println!("  High:      {}", status.high);
    println!("  Medium:    {}", status.medium);
    println!("  Low:       {}", status.low);
    println!("  Ignore:    {}", status.ignore);
    println!("  Processed: {}", status.processed);
    Ok(())
}

/// Handles `unrequested`: prints one hostname per line
fn handle_unrequested(config_path: &Path, patterns: &[String]) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let storage = open_storage(Path::new(&config.spider.database_file))?;

    for hostname in storage.unrequested_domains(patterns)? {
        println!("{}", hostname);
    }
    Ok(())
}

/// Handles `blob`: prints each blob's decompressed content under a header
fn handle_blob(config_path: &Path, ids: &[i64]) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let storage = open_storage(Path::new(&config.spider.database_file))?;

    for &id in ids {
        match storage
            .blob(id)
            .with_context(|| format!("Failed to read blob #{}", id))?
        {
            Some(content) => println!("--- #{} ---

{}
", id, content),
            None => println!("--- #{} NOT FOUND ---", id),
        }
    }
    Ok(())
}
