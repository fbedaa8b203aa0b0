//! Fixed-rate throttle between fetch rounds.
//!
//! [`RoundThrottle`] enforces a minimum wall-clock interval between the
//! *start* of one round and the start of the next, no matter how quickly the
//! previous round finished. It is a fixed window, not a token bucket: unused
//! time is never banked for later bursts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::RoundThrottle;
//!
//! # async fn example() {
//! let throttle = RoundThrottle::new(Duration::from_secs(5));
//!
//! // First round starts immediately
//! throttle.acquire().await;
//!
//! // Second round waits until 5s after the first one started
//! throttle.acquire().await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative throttle delay (10 minutes).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(600);

/// Minimum-interval gate shared by everything that starts a round.
///
/// `RoundThrottle` is `Send + Sync` and is meant to be wrapped in `Arc` when
/// the paginator and a batch fetcher share one rate budget.
#[derive(Debug)]
pub struct RoundThrottle {
    /// Minimum time between consecutive round starts.
    interval: Duration,

    /// Whether throttling is disabled (interval of zero).
    disabled: bool,

    /// Start time of the previous round.
    /// Held across the sleep so concurrent callers queue up in order.
    /// `None` until the first round starts (first round is immediate).
    last_start: Mutex<Option<Instant>>,

    /// Total time spent waiting, in milliseconds.
    cumulative_delay_ms: AtomicU64,

    /// Whether the cumulative-delay warning was already emitted.
    warned: AtomicBool,
}

impl RoundThrottle {
    /// Creates a throttle with the given minimum interval between round starts.
    ///
    /// An interval of zero yields a disabled throttle.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating round throttle");
        Self {
            interval,
            disabled: interval.is_zero(),
            last_start: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Creates a throttle that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether throttling is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the minimum interval between round starts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the total time spent waiting so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until a new round may start, then records the start.
    ///
    /// Returns how long the caller was held back.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }

        let mut last_start_guard = self.last_start.lock().await;

        let mut waited = Duration::ZERO;
        if let Some(last_start) = *last_start_guard {
            let elapsed = last_start.elapsed();
            if elapsed < self.interval {
                waited = self.interval.saturating_sub(elapsed);
                let cumulative = self.add_cumulative_delay(waited);

                debug!(
                    delay_ms = waited.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "throttling round start"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && !self.warned.swap(true, Ordering::SeqCst)
                {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "rounds spend a long time throttled - consider larger batches"
                    );
                }

                tokio::time::sleep_until(last_start + self.interval).await;
            }
        } else {
            debug!("first round - no delay");
        }

        *last_start_guard = Some(Instant::now());
        waited
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}
