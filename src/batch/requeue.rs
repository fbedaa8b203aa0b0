//! Bounded reattempt of failed fetches.
//!
//! When a fetch fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - temporary failures that may succeed in a later round
//! - [`FailureType::RateLimited`] - the source asked us to slow down (HTTP 429)
//! - [`FailureType::Permanent`] - failures that won't succeed regardless of reattempts
//!
//! The [`RequeuePolicy`] then decides whether the item goes back onto the
//! pending work list. Spacing between reattempts comes from the round
//! throttle, so there is no separate backoff here.
//!
//! # Example
//!
//! ```
//! use harvester_core::{FetchError, RequeueDecision, RequeuePolicy, classify_error};
//!
//! let policy = RequeuePolicy::default();
//! let error = FetchError::http_status("https://example.com/api/get_user_best", 503);
//!
//! match policy.should_requeue(classify_error(&error), 1) {
//!     RequeueDecision::Requeue { attempt } => println!("requeued for attempt {attempt}"),
//!     RequeueDecision::Drop { reason } => println!("dropped: {reason}"),
//! }
//! ```

use tracing::{debug, instrument};

use crate::fetch::FetchError;

/// Default maximum attempts per item (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Classification of fetch failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed later.
    ///
    /// Examples: timeout, connection reset, 5xx server errors.
    Transient,

    /// Failure that won't succeed regardless of reattempts.
    ///
    /// Examples: 404, 401, malformed payload, invalid URL.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to put a failed item back on the work list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueDecision {
    /// Fetch the item again in a later round.
    Requeue {
        /// Which attempt number this will be (1-indexed, so the first reattempt is 2).
        attempt: u32,
    },

    /// Give up on the item.
    Drop {
        /// Human-readable reason why the item is dropped.
        reason: String,
    },
}

/// How many times a failed item is attempted before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RequeuePolicy {
    /// Creates a policy with the given attempt budget (at least one).
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether an item whose `attempt`-th fetch failed is requeued.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_requeue(&self, failure_type: FailureType, attempt: u32) -> RequeueDecision {
        if failure_type == FailureType::Permanent {
            return RequeueDecision::Drop {
                reason: "permanent failure - reattempt would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RequeueDecision::Drop {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RequeueDecision::Requeue {
            attempt: attempt + 1,
        }
    }
}

/// Classifies a fetch error into a failure type for requeue decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Network, Aborted | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | Other HTTP 4xx | Permanent |
/// | Remote, Malformed, InvalidUrl | Permanent |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::Aborted { .. } => {
            FailureType::Transient
        }
        FetchError::Remote { .. } | FetchError::Malformed { .. } | FetchError::InvalidUrl { .. } => {
            FailureType::Permanent
        }
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_policy_default_attempts() {
        assert_eq!(RequeuePolicy::default().max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_requeue_policy_minimum_is_one() {
        assert_eq!(RequeuePolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_transient_failure_is_requeued_until_budget() {
        let policy = RequeuePolicy::with_max_attempts(3);
        assert_eq!(
            policy.should_requeue(FailureType::Transient, 1),
            RequeueDecision::Requeue { attempt: 2 }
        );
        assert_eq!(
            policy.should_requeue(FailureType::RateLimited, 2),
            RequeueDecision::Requeue { attempt: 3 }
        );
        assert!(matches!(
            policy.should_requeue(FailureType::Transient, 3),
            RequeueDecision::Drop { .. }
        ));
    }

    #[test]
    fn test_permanent_failure_is_dropped_immediately() {
        let policy = RequeuePolicy::with_max_attempts(10);
        match policy.should_requeue(FailureType::Permanent, 1) {
            RequeueDecision::Drop { reason } => assert!(reason.contains("permanent")),
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (404, FailureType::Permanent),
            (401, FailureType::Permanent),
            (408, FailureType::Transient),
            (429, FailureType::RateLimited),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = FetchError::http_status("t", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(classify_error(&FetchError::timeout("t")), FailureType::Transient);
        assert_eq!(classify_error(&FetchError::aborted("t")), FailureType::Transient);
        assert_eq!(
            classify_error(&FetchError::malformed("t", "bad")),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&FetchError::remote("t", "bad key")),
            FailureType::Permanent
        );
    }
}
