//! Error types for individual fetches.
//!
//! Every variant carries the fetch *target*: the endpoint URL without its
//! query string (so credentials never end up in logs) or the key of a batch
//! item.

use thiserror::Error;

/// Errors that can occur while fetching one page, item or enrichment value.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {target}: {source}")]
    Network {
        /// What was being fetched.
        target: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within its time budget.
    #[error("timeout fetching {target}")]
    Timeout {
        /// What was being fetched.
        target: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {target}")]
    HttpStatus {
        /// What was being fetched.
        target: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The source answered with a structured error instead of data.
    #[error("remote error from {target}: {message}")]
    Remote {
        /// What was being fetched.
        target: String,
        /// The error message reported by the source.
        message: String,
    },

    /// The response body does not have the expected shape.
    #[error("malformed response from {target}: {reason}")]
    Malformed {
        /// What was being fetched.
        target: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The configured URL cannot be used.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The fetch task ended without producing a result (panic or abort).
    #[error("fetch task for {target} ended unexpectedly")]
    Aborted {
        /// What was being fetched.
        target: String,
    },
}

impl FetchError {
    /// Creates a network error, promoting reqwest timeouts to [`FetchError::Timeout`].
    pub fn network(target: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(target);
        }
        Self::Network {
            target: target.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(target: impl Into<String>) -> Self {
        Self::Timeout {
            target: target.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(target: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            target: target.into(),
            status,
        }
    }

    /// Creates a remote (source-reported) error.
    pub fn remote(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an aborted-task error.
    pub fn aborted(target: impl Into<String>) -> Self {
        Self::Aborted {
            target: target.into(),
        }
    }
}
