//! Request scheduler shared by every traversal job
//!
//! This module handles:
//! - Global concurrency limiting via a semaphore
//! - Minimum spacing between successive dispatches
//! - Process-wide cooldown when the API signals a rate limit
//! - Retrying transient failures with jittered exponential backoff
//! - Cancellation of waiting and future requests

use crate::config::SchedulerConfig;
use crate::crawler::fetcher::{RateLimitHint, TransportError};
use crate::state::DispatchState;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

/// Longest pause between two attempts of one request
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Snapshot of the scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Attempts handed to the transport
    pub dispatched: u64,
    /// Attempts repeated after a transient failure
    pub retried: u64,
    /// Rate-limit signals received (429s and exhausted quotas)
    pub rate_limited: u64,
    /// Highest number of attempts in flight at once
    pub peak_in_flight: usize,
}

/// Scheduler enforces global request limits
///
/// The scheduler coordinates:
/// - Global concurrency limits (max requests in flight)
/// - Minimum time between dispatch starts, independent of concurrency
/// - A single cooldown that pauses all dispatching after a rate limit
/// - Retry of transient failures
///
/// It is shared by all jobs as an `Arc<Scheduler>`; every method takes `&self`.
pub struct Scheduler {
    semaphore: Semaphore,
    dispatch: Mutex<DispatchState>,
    max_retries: u32,
    rate_limit_cooldown: Duration,
    backoff: ExponentialBuilder,
    cancel: watch::Sender<bool>,
    dispatched: AtomicU64,
    retried: AtomicU64,
    rate_limited: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Keeps the in-flight gauge accurate even if the request future is dropped
struct InFlight<'a> {
    scheduler: &'a Scheduler,
    _permit: SemaphorePermit<'a>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.scheduler.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Concurrency, spacing, retry and cooldown settings
    pub fn new(config: &SchedulerConfig) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(MAX_BACKOFF)
            .with_max_times(config.max_retries as usize)
            .with_jitter();

        Self {
            semaphore: Semaphore::new(config.max_concurrent.max(1) as usize),
            dispatch: Mutex::new(DispatchState::new(Duration::from_millis(config.min_time))),
            max_retries: config.max_retries,
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown),
            backoff,
            cancel: watch::channel(false).0,
            dispatched: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replaces the retry backoff policy
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff.with_max_times(self.max_retries as usize);
        self
    }

    /// Runs `op` under the scheduler's limits, retrying as allowed
    ///
    /// Each attempt waits for a free slot, for the spacing since the previous
    /// dispatch, and for any active cooldown. A `RateLimited` failure enters the
    /// global cooldown and is tried again without using up a retry.
    /// Retryable failures are attempted again up to `max_retries` times; any
    /// other failure is returned at once.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful attempt
    /// * `Err(TransportError::Cancelled)` - The scheduler was cancelled while waiting
    /// * `Err(TransportError)` - A non-retryable failure, or the last retryable one
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut backoff = self.backoff.build();
        let mut retries = 0;

        loop {
            let result = {
                let _slot = self.acquire().await?;
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                op().await
            };

            match result {
                Ok(value) => return Ok(value),
                Err(TransportError::RateLimited { url, reset }) => {
                    let wait = reset.unwrap_or(self.rate_limit_cooldown);
                    self.rate_limited.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Rate limited on {}, pausing all requests for {:?}",
                        url,
                        wait
                    );
                    self.enter_cooldown(wait).await;
                }
                Err(err) if err.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    self.retried.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next().unwrap_or(MAX_BACKOFF);
                    tracing::debug!(
                        "{} (retry {}/{} in {:?})",
                        err,
                        retries,
                        self.max_retries,
                        delay
                    );
                    self.pause(delay).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies the quota hint of a successful response
    ///
    /// An exhausted quota starts the cooldown before the API has to refuse us.
    pub async fn observe(&self, hint: &RateLimitHint) {
        if hint.is_exhausted() {
            let wait = hint.reset.unwrap_or(self.rate_limit_cooldown);
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Request quota exhausted, pausing for {:?}", wait);
            self.enter_cooldown(wait).await;
        }
    }

    /// Pauses every dispatch for `duration`
    pub async fn enter_cooldown(&self, duration: Duration) {
        self.dispatch
            .lock()
            .await
            .enter_cooldown(Instant::now(), duration);
    }

    /// Stops all waiting and future dispatches
    ///
    /// Requests already in flight run to completion.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Completes once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns a snapshot of the counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Waits for a slot, the dispatch spacing and any cooldown
    async fn acquire(&self) -> Result<InFlight<'_>, TransportError> {
        if self.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancelled() => return Err(TransportError::Cancelled),
            permit = self.semaphore.acquire() => permit.map_err(|_| TransportError::Cancelled)?,
        };

        // Re-check after every sleep: the cooldown may have been extended meanwhile
        loop {
            let wait = {
                let mut state = self.dispatch.lock().await;
                let now = Instant::now();
                match state.time_until_next_dispatch(now) {
                    None => {
                        state.record_dispatch(now);
                        break;
                    }
                    Some(wait) => {
                        if state.in_cooldown(now) {
                            tracing::debug!("Cooling down, next dispatch in {:?}", wait);
                        }
                        wait
                    }
                }
            };
            self.pause(wait).await?;
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        Ok(InFlight {
            scheduler: self,
            _permit: permit,
        })
    }

    /// Sleeps unless cancelled first
    async fn pause(&self, duration: Duration) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(TransportError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
