//! Bounded-concurrency batch fetching with a fixed-rate round throttle.
//!
//! A [`BatchFetcher`] takes a bounded list of keys, fetches them concurrently
//! (at most `concurrency` in flight), and joins every result before returning.
//! Each item succeeds or fails on its own; one failure never aborts the rest of
//! the round. Round starts are spaced by a shared [`RoundThrottle`].
//!
//! # Concurrency Model
//!
//! - Each fetch runs in its own Tokio task
//! - A semaphore permit is acquired before spawning each task
//! - Permits are released automatically when the task finishes (RAII)
//! - Every task result comes back through its `JoinHandle`; nothing else is shared
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester_core::{BatchFetcher, FetchError, RoundThrottle};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let throttle = Arc::new(RoundThrottle::new(Duration::from_secs(5)));
//! let fetcher = BatchFetcher::new(100, 100, throttle)?;
//!
//! let keys = vec!["1".to_string(), "2".to_string()];
//! let outcome = fetcher
//!     .run_round(keys, |key| async move { Ok::<_, FetchError>(key.len()) })
//!     .await?;
//! println!("ok: {}, failed: {}", outcome.succeeded.len(), outcome.failed.len());
//! # Ok(())
//! # }
//! ```

mod requeue;
mod throttle;

pub use requeue::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RequeueDecision, RequeuePolicy, classify_error,
};
pub use throttle::RoundThrottle;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::fetch::FetchError;

/// Maximum allowed batch size.
const MAX_BATCH_SIZE: usize = 500;

/// Default number of items per round.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default minimum interval between round starts.
pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(5);

/// Default time budget for one item fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for batch fetcher operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid batch size provided.
    #[error("invalid batch size {value}: must be between 1 and {MAX_BATCH_SIZE}")]
    InvalidBatchSize {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Invalid concurrency value provided.
    #[error("invalid concurrency {value}: must be between 1 and the batch size {batch_size}")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
        /// The configured batch size.
        batch_size: usize,
    },

    /// More keys than the batch size were submitted for one round.
    #[error("round of {len} items exceeds batch size {batch_size}")]
    RoundTooLarge {
        /// Number of keys submitted.
        len: usize,
        /// The configured batch size.
        batch_size: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// One failed item of a round.
#[derive(Debug)]
pub struct ItemFailure {
    /// The key that was being fetched.
    pub key: String,
    /// Why it failed.
    pub error: FetchError,
}

/// Per-item results of one round, in submission order.
#[derive(Debug)]
pub struct RoundOutcome<T> {
    /// Keys that were fetched successfully, with their values.
    pub succeeded: Vec<(String, T)>,
    /// Keys that failed, with their errors.
    pub failed: Vec<ItemFailure>,
}

impl<T> RoundOutcome<T> {
    fn empty() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Returns true if every item failed or the round was empty.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        self.succeeded.is_empty()
    }
}

/// Running totals across all rounds of one fetcher.
///
/// Uses atomic counters so the fetcher can be shared by reference.
#[derive(Debug, Default)]
pub struct BatchStats {
    rounds: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchStats {
    /// Returns the number of rounds started.
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Returns the number of items fetched successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Returns the number of failed item fetches.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn increment_rounds(&self) {
        self.rounds.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concurrent fetcher for bounded rounds of independent items.
#[derive(Debug)]
pub struct BatchFetcher {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Maximum keys per round.
    batch_size: usize,
    /// Maximum fetches in flight.
    concurrency: usize,
    /// Time budget per item.
    fetch_timeout: Duration,
    /// Spacing between round starts.
    throttle: Arc<RoundThrottle>,
    stats: BatchStats,
}

impl BatchFetcher {
    /// Creates a batch fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBatchSize`] if `batch_size` is outside
    /// 1..=500, or [`BatchError::InvalidConcurrency`] if `concurrency` is zero
    /// or larger than the batch size.
    #[instrument(level = "debug", skip(throttle))]
    pub fn new(
        batch_size: usize,
        concurrency: usize,
        throttle: Arc<RoundThrottle>,
    ) -> Result<Self, BatchError> {
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(BatchError::InvalidBatchSize { value: batch_size });
        }
        if !(1..=batch_size).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency {
                value: concurrency,
                batch_size,
            });
        }

        debug!(
            batch_size,
            concurrency,
            interval_ms = throttle.interval().as_millis(),
            "creating batch fetcher"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            batch_size,
            concurrency,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            throttle,
            stats: BatchStats::default(),
        })
    }

    /// Sets the per-item fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Returns the maximum keys per round.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the maximum fetches in flight.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the per-item fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the running totals.
    #[must_use]
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Fetches one round of keys.
    ///
    /// Waits for the throttle, spawns one task per key (bounded by the
    /// semaphore), applies the per-item timeout, and joins every task before
    /// returning. An empty key list returns immediately without consuming a
    /// throttle slot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::RoundTooLarge`] if more keys than the batch size
    /// are submitted, or [`BatchError::SemaphoreClosed`] if the semaphore is
    /// closed. Individual fetch failures never make this method fail; they
    /// are reported in [`RoundOutcome::failed`].
    #[instrument(skip(self, keys, fetch), fields(items = keys.len()))]
    pub async fn run_round<T, F, Fut>(
        &self,
        keys: Vec<String>,
        fetch: F,
    ) -> Result<RoundOutcome<T>, BatchError>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if keys.len() > self.batch_size {
            return Err(BatchError::RoundTooLarge {
                len: keys.len(),
                batch_size: self.batch_size,
            });
        }

        let mut outcome = RoundOutcome::empty();
        if keys.is_empty() {
            return Ok(outcome);
        }

        let waited = self.throttle.acquire().await;
        self.stats.increment_rounds();
        debug!(waited_ms = waited.as_millis(), "round started");

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BatchError::SemaphoreClosed)?;

            let request = fetch(key.clone());
            let timeout = self.fetch_timeout;
            let target = key.clone();

            handles.push((
                key,
                tokio::spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    match tokio::time::timeout(timeout, request).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::timeout(target)),
                    }
                }),
            ));
        }

        for (key, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => {
                    self.stats.increment_succeeded();
                    outcome.succeeded.push((key, value));
                }
                Ok(Err(error)) => {
                    warn!(key = %key, error = %error, "batch item failed");
                    self.stats.increment_failed();
                    outcome.failed.push(ItemFailure { key, error });
                }
                Err(join_error) => {
                    warn!(key = %key, error = %join_error, "batch task panicked");
                    self.stats.increment_failed();
                    let error = FetchError::aborted(key.clone());
                    outcome.failed.push(ItemFailure { key, error });
                }
            }
        }

        debug!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "round complete"
        );

        Ok(outcome)
    }
}
