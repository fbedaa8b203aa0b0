//! JSON checkpoint file with atomic replacement.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::{Checkpoint, CheckpointError, CursorStore};

/// Stores the checkpoint as one JSON document.
///
/// Saves go to `<path>.tmp`, are fsynced, and are then renamed over `<path>`,
/// so a crash leaves either the old or the new document in place.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Creates a store backed by `path`. Nothing is touched until `save`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the checkpoint path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no checkpoint file");
                return Ok(None);
            }
            Err(e) => return Err(Self::io_error(&self.path, e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        checkpoint.ensure_supported()?;

        debug!(
            cursor = ?checkpoint.cursor.as_ref().map(|c| c.as_str().to_string()),
            seen = checkpoint.seen_ids.len(),
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self, checkpoint), fields(path = %self.path.display()))]
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let encoded = serde_json::to_vec_pretty(checkpoint).map_err(CheckpointError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(parent, e))?;
        }

        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| Self::io_error(&temp, e))?;
        file.write_all(&encoded)
            .await
            .map_err(|e| Self::io_error(&temp, e))?;
        file.sync_all().await.map_err(|e| Self::io_error(&temp, e))?;
        drop(file);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| Self::io_error(&self.path, e))?;

        debug!(bytes = encoded.len(), "checkpoint saved");
        Ok(())
    }
}
