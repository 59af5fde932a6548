//! Thread-Archiver main entry point
//!
//! This is the command-line interface for the thread archiver.

use clap::Parser;
use std::path::{Path, PathBuf};
use thread_archiver::config::{assemble_config, Config, ConfigOverrides, DateBound};
use thread_archiver::output::{load_statistics, print_run_summary, print_statistics, RunSummary};
use thread_archiver::storage::open_store;
use thread_archiver::target::resolve_input;
use thread_archiver::{ArchiveError, Coordinator};
use tracing_subscriber::EnvFilter;

/// Thread-Archiver: an incremental archiver for threaded discussions
///
/// Archives communities (r/<name>), users (u/<name>) and posts (p/<id> or a
/// permalink) into a local SQLite database. TARGET may also be a file with one
/// target per line, or previous/<letters> to revisit saved targets.
#[derive(Parser, Debug)]
#[command(name = "thread-archiver")]
#[command(version)]
#[command(about = "An incremental archiver for threaded discussions", long_about = None)]
struct Cli {
    /// Target, target file or previous/<letters>
    #[arg(value_name = "TARGET", required_unless_present = "stats")]
    target: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the SQLite archive
    #[arg(long, value_name = "PATH")]
    database: Option<String>,

    /// Retries after a failed request
    #[arg(long)]
    max_retries: Option<u32>,

    /// Maximum requests in flight
    #[arg(long)]
    max_concurrent: Option<u32>,

    /// Minimum time between requests (milliseconds)
    #[arg(long, value_name = "MS")]
    min_time: Option<u64>,

    /// Proxy URI (http, https, socks4 or socks5)
    #[arg(long, value_name = "URI")]
    proxy: Option<String>,

    /// Do not validate the proxy's TLS certificate
    #[arg(long)]
    proxy_insecure: bool,

    /// Maximum items examined per listing
    #[arg(long)]
    limit: Option<u32>,

    /// Only items created at or after this time ("yyyy-MM-dd HH:mm" or "yyyy-MM-dd", UTC)
    #[arg(long, value_name = "DATE")]
    after: Option<DateBound>,

    /// Only items created before this time
    #[arg(long, value_name = "DATE")]
    before: Option<DateBound>,

    /// Also archive comment trees
    #[arg(long)]
    comments: bool,

    /// Also archive the profiles of post authors
    #[arg(long)]
    authors: bool,

    /// Replace items already in the archive
    #[arg(long)]
    overwrite: bool,

    /// Replace items already marked deleted
    #[arg(long)]
    overwrite_deleted: bool,

    /// Stop a listing at the first item already archived
    #[arg(long = "continue")]
    continue_mode: bool,

    /// Do not save targets for previous/ runs
    #[arg(long)]
    no_save_target: bool,

    /// Credentials file for authenticated access
    #[arg(long, value_name = "FILE")]
    auth: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resolve targets and show the jobs without archiving anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the archive and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

impl Cli {
    /// Command-line values, with inverted flags normalized
    fn overrides(&self) -> ConfigOverrides {
        let flag = |set: bool| set.then_some(true);

        ConfigOverrides {
            max_retries: self.max_retries,
            max_concurrent: self.max_concurrent,
            min_time: self.min_time,
            proxy_url: self.proxy.clone(),
            reject_unauthorized_tls: self.proxy_insecure.then_some(false),
            limit: self.limit,
            after: self.after,
            before: self.before,
            fetch_comments: flag(self.comments),
            fetch_post_authors: flag(self.authors),
            overwrite: flag(self.overwrite),
            overwrite_deleted: flag(self.overwrite_deleted),
            continue_mode: flag(self.continue_mode),
            save_target_to_db: self.no_save_target.then_some(false),
            auth: self.auth.clone(),
            database_path: self.database.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Some(path) = &cli.config {
        tracing::info!("Loading configuration from: {}", path.display());
    }
    let config = match assemble_config(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.stats {
        return handle_stats(&config);
    }

    // clap guarantees a target outside --stats
    let target = cli.target.unwrap_or_default();
    if cli.dry_run {
        handle_dry_run(&config, &target)
    } else {
        handle_archive(config, &target).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("thread_archiver=info,warn"),
            1 => EnvFilter::new("thread_archiver=debug,info"),
            2 => EnvFilter::new("thread_archiver=trace,debug"),
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

/// Handles the --stats mode: shows statistics from the archive
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --dry-run mode: shows what would be archived
fn handle_dry_run(config: &Config, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Thread-Archiver Dry Run ===\n");

    let storage = open_store(Path::new(&config.output.database_path))?;
    let resolution = resolve_input(target, &storage)?;

    let fetch = &config.fetch;
    println!("Fetch:");
    println!("  Limit: {}", fetch.limit.map_or("none".to_string(), |l| l.to_string()));
    println!("  After: {}", fetch.after.map_or("none".to_string(), |d| d.0.to_rfc3339()));
    println!("  Before: {}", fetch.before.map_or("none".to_string(), |d| d.0.to_rfc3339()));
    println!("  Comments: {}", fetch.fetch_comments);
    println!("  Authors: {}", fetch.fetch_post_authors);
    println!(
        "  Overwrite: {} (deleted: {})",
        fetch.overwrite, fetch.overwrite_deleted
    );
    println!("  Continue: {}", fetch.continue_mode);
    println!("  Save targets: {}", fetch.save_target_to_db);

    println!("\nJobs ({}):", resolution.jobs.len());
    for job in &resolution.jobs {
        println!("  - {}", job.target);
    }

    if !resolution.rejected.is_empty() {
        println!("\nRejected ({}):", resolution.rejected.len());
        for rejected in &resolution.rejected {
            println!("  - {}: {}", rejected.input, rejected.reason);
        }
    }

    Ok(())
}

/// Handles the main archive operation
async fn handle_archive(config: Config, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    match archive(config, target).await {
        Ok(summary) => {
            print_run_summary(&summary);
            Ok(())
        }
        Err(e) => {
            if e.is_fatal() {
                tracing::error!("Cannot start: {}", e);
            } else {
                tracing::error!("Archive run failed: {}", e);
            }
            Err(e.into())
        }
    }
}

async fn archive(config: Config, target: &str) -> Result<RunSummary, ArchiveError> {
    let coordinator = Coordinator::new(config).await?;

    let scheduler = coordinator.scheduler();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, letting requests in flight finish");
            scheduler.cancel();
        }
    });

    coordinator.run(target).await
}
