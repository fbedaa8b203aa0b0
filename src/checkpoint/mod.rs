//! Durable harvesting progress.
//!
//! A [`Checkpoint`] is the single piece of state that survives a restart: the
//! cursor to resume from, the identifiers already emitted, the entities
//! already completed, and the enrichment cache. It is owned by a
//! [`CursorStore`], which persists it atomically.

mod file;
mod memory;
mod sqlite;

pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;
pub use sqlite::SqliteCursorStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cursor::{Cursor, CursorError};
use crate::db::DbError;

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Errors raised while loading or saving a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint file failed.
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        /// Path of the file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The stored checkpoint exists but cannot be read.
    #[error("checkpoint at {path} is corrupt: {reason}")]
    Corrupt {
        /// Location of the checkpoint.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The checkpoint could not be serialized.
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stored checkpoint was written by an unknown schema version.
    #[error("unsupported checkpoint version {found} (expected {CHECKPOINT_VERSION})")]
    UnsupportedVersion {
        /// Version found in storage.
        found: u32,
    },

    /// The stored cursor does not parse.
    #[error("stored cursor is invalid: {0}")]
    InvalidCursor(#[from] CursorError),

    /// A database query failed.
    #[error("checkpoint database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The checkpoint database could not be opened.
    #[error(transparent)]
    Open(#[from] DbError),
}

/// Persisted harvesting progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version of this checkpoint.
    pub version: u32,
    /// Cursor of the next page to fetch. Absent in entity mode.
    #[serde(default)]
    pub cursor: Option<Cursor>,
    /// Identifiers of records already written.
    #[serde(default)]
    pub seen_ids: BTreeSet<String>,
    /// Entity ids whose records have all been written.
    #[serde(default)]
    pub completed_entities: BTreeSet<String>,
    /// Enrichment values by group key.
    #[serde(default)]
    pub aux_cache: BTreeMap<String, Value>,
}

impl Checkpoint {
    /// Creates an empty checkpoint positioned at `cursor`.
    #[must_use]
    pub fn new(cursor: Option<Cursor>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            cursor,
            seen_ids: BTreeSet::new(),
            completed_entities: BTreeSet::new(),
            aux_cache: BTreeMap::new(),
        }
    }

    /// Fails if this checkpoint was written by another schema version.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::UnsupportedVersion`] on mismatch.
    pub fn ensure_supported(&self) -> Result<(), CheckpointError> {
        if self.version == CHECKPOINT_VERSION {
            Ok(())
        } else {
            Err(CheckpointError::UnsupportedVersion {
                found: self.version,
            })
        }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Durable storage for a [`Checkpoint`].
///
/// `save` must be atomic with respect to a crash: after a crash, `load`
/// returns either the previous or the new checkpoint, never a mix.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Loads the stored checkpoint, or `None` when there is no prior progress.
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replaces the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}
