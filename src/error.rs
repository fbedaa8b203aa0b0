//! Run-level errors.
//!
//! Per-item fetch failures are handled where they happen (reattempted, or
//! counted and dropped). Anything that reaches [`HarvestError`] ends the run;
//! the last saved checkpoint remains the resume point.

use thiserror::Error;

use crate::batch::BatchError;
use crate::checkpoint::CheckpointError;
use crate::cursor::CursorError;
use crate::fetch::FetchError;
use crate::sink::SinkError;

/// Errors that abort a harvesting run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Page fetch failed on every attempt.
    #[error("page fetch failed after {attempts} attempts: {source}")]
    Transport {
        /// Attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: FetchError,
    },

    /// The source answered with an error payload.
    #[error("remote source reported an error: {message}")]
    Remote {
        /// Message returned by the source.
        message: String,
    },

    /// The source answered with something that is not a page of records.
    #[error("malformed response: {reason}")]
    Malformed {
        /// What was wrong with it.
        reason: String,
    },

    /// Loading or saving progress failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The sink could not make a page durable.
    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),

    /// The batch fetcher rejected a round.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A cursor could not be computed.
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Invalid run options.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarvestError {
    /// Maps a page fetch error that is not worth reattempting.
    ///
    /// Returns `None` for transport failures, which the caller may retry.
    pub(crate) fn from_fatal_fetch(error: &FetchError) -> Option<Self> {
        match error {
            FetchError::Remote { message, .. } => Some(Self::Remote {
                message: message.clone(),
            }),
            FetchError::Malformed { .. } | FetchError::InvalidUrl { .. } => Some(Self::Malformed {
                reason: error.to_string(),
            }),
            FetchError::HttpStatus { status, .. }
                if (400..500).contains(status) && *status != 408 && *status != 429 =>
            {
                Some(Self::Remote {
                    message: error.to_string(),
                })
            }
            _ => None,
        }
    }
}
