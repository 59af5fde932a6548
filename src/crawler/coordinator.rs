//! Archive coordinator - run orchestration
//!
//! This module ties a run together:
//! - Opening the archive and building the transport, scheduler and media handle
//! - Exchanging credentials for a bearer token
//! - Resolving the target input into traversal jobs
//! - Running the jobs on a bounded pool and collecting their reports
//! - Recording the run and its final status

use crate::config::{config_hash, Config};
use crate::crawler::auth::{load_credentials, request_token};
use crate::crawler::context::RunContext;
use crate::crawler::fetcher::{build_http_client, Fetcher};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::traversal::run_job;
use crate::media::MediaTool;
use crate::output::{RunSummary, TargetReport};
use crate::storage::{open_store, RunStatus, SqliteStorage, Storage};
use crate::target::{resolve_input, Resolution};
use crate::{ArchiveError, ConfigError};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Main archive coordinator structure
pub struct Coordinator {
    ctx: Arc<RunContext>,
}

impl Coordinator {
    /// Creates a coordinator ready to run
    ///
    /// Every fatal condition surfaces here, before any traversal starts: an
    /// unusable store, a failed migration, an unusable client configuration or
    /// refused credentials. A missing or outdated media tool only disables the
    /// media step.
    ///
    /// # Arguments
    ///
    /// * `config` - The validated run configuration
    pub async fn new(config: Config) -> Result<Self, ArchiveError> {
        let storage = open_store(Path::new(&config.output.database_path))?;
        tracing::info!(
            "Opened archive {} (schema version {})",
            config.output.database_path,
            storage.schema_version()?
        );

        let client = build_http_client(&config.api, &config.proxy)
            .map_err(|e| ConfigError::Validation(format!("cannot build HTTP client: {}", e)))?;
        let scheduler = Arc::new(Scheduler::new(&config.scheduler));

        let fetcher = match &config.auth {
            Some(path) => {
                let credentials = load_credentials(path)?;
                let token = scheduler
                    .execute(|| request_token(&client, &config.api.token_url, &credentials))
                    .await?;
                tracing::info!("Authenticated as {}", credentials.username);
                Fetcher::new(client, config.api.oauth_base_url.as_str()).with_bearer(token)
            }
            None => Fetcher::new(client, config.api.base_url.as_str()),
        };

        let media = if config.media.enabled {
            match MediaTool::detect(&config.media).await {
                Ok(tool) => {
                    tracing::info!("Media archiving enabled (tool version {})", tool.version());
                    Some(tool)
                }
                Err(e) => {
                    tracing::warn!("Media archiving disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            ctx: Arc::new(RunContext {
                config: Arc::new(config),
                fetcher,
                scheduler,
                storage: Arc::new(Mutex::new(storage)),
                media,
            }),
        })
    }

    /// The scheduler shared by every job; cancel it to interrupt the run
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.ctx.scheduler)
    }

    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        Arc::clone(&self.ctx.storage)
    }

    /// Resolves target input against this coordinator's archive
    pub fn resolve(&self, input: &str) -> Result<Resolution, ArchiveError> {
        self.ctx.with_storage(|storage| resolve_input(input, &*storage))
    }

    /// Runs every job `input` resolves to and records the run
    ///
    /// Rejected target lines show up as skipped targets; they never stop the
    /// other jobs. A cancelled scheduler lets in-flight requests finish and
    /// records the run as interrupted.
    pub async fn run(&self, input: &str) -> Result<RunSummary, ArchiveError> {
        let started = Instant::now();
        let hash = config_hash(&self.ctx.config);
        let run_id = self.ctx.with_storage(|s| s.create_run(&hash))?;
        tracing::info!("Starting archive run {}", run_id);

        let resolution = match self.resolve(input) {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!("Could not resolve targets: {}", e);
                self.ctx
                    .with_storage(|s| s.finish_run(run_id, RunStatus::Failed))?;
                return Err(e);
            }
        };

        let mut targets = self.run_jobs(&resolution).await;
        targets.extend(
            resolution
                .rejected
                .iter()
                .map(|rejected| TargetReport::skipped(&rejected.input, &rejected.reason)),
        );

        let status = if self.ctx.scheduler.is_cancelled() {
            tracing::warn!("Run {} interrupted", run_id);
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        self.ctx.with_storage(|s| s.finish_run(run_id, status))?;

        let summary = RunSummary {
            run_id,
            status,
            targets,
            scheduler: self.ctx.scheduler.stats(),
            elapsed: started.elapsed(),
        };

        let totals = summary.totals();
        tracing::info!(
            "Run {} finished in {:?}: {} targets, {} items written, {} requests",
            run_id,
            summary.elapsed,
            summary.targets.len(),
            totals.writes(),
            summary.scheduler.dispatched
        );

        Ok(summary)
    }

    /// Runs the jobs with at most `max-parallel-jobs` at once
    ///
    /// Reports come back in job order, whatever order the jobs finish in.
    async fn run_jobs(&self, resolution: &Resolution) -> Vec<TargetReport> {
        let parallel = self.ctx.config.crawler.max_parallel_jobs.max(1) as usize;
        let ctx = self.ctx.as_ref();
        tracing::info!(
            "Archiving {} targets, {} at a time",
            resolution.jobs.len(),
            parallel
        );

        let mut reports: Vec<(usize, TargetReport)> =
            stream::iter(resolution.jobs.iter().enumerate())
                .map(|(index, job)| async move { (index, run_job(ctx, job).await) })
                .buffer_unordered(parallel)
                .collect()
                .await;

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}

/// Runs a complete archive operation
///
/// This is the main library entry point. It will:
/// 1. Open and migrate the archive
/// 2. Authenticate, if credentials are configured
/// 3. Resolve `input` into traversal jobs
/// 4. Run the jobs and record the run
///
/// # Example
///
/// ```no_run
/// use thread_archiver::config::Config;
/// use thread_archiver::run_archive;
///
/// # async fn demo() -> Result<(), thread_archiver::ArchiveError> {
/// let summary = run_archive(Config::default(), "r/rust").await?;
/// println!("{} items written", summary.totals().writes());
/// # Ok(())
/// # }
/// ```
pub async fn run_archive(config: Config, input: &str) -> Result<RunSummary, ArchiveError> {
    let coordinator = Coordinator::new(config).await?;
    coordinator.run(input).await
}
