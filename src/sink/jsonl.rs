use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::{RecordSink, SinkError, open_for_append};
use crate::record::{Record, scalar_key};

/// Appends records as JSON Lines, one object per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened or repaired.
    #[instrument(fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let target = open_for_append(path).await?;
        debug!(existing_bytes = target.existing_len, "opened JSON Lines sink");
        Ok(Self {
            writer: BufWriter::new(target.file),
            path: target.path,
            written: 0,
        })
    }

    /// Returns how many records this sink has written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record.fields()).map_err(|source| SinkError::Encode {
            id: record.id().to_string(),
            source,
        })?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| SinkError::io(&self.path, e))
    }

    async fn written_ids(&mut self, id_field: &str) -> Result<Vec<String>, SinkError> {
        self.flush().await?;
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;

        let mut ids = Vec::new();
        let mut unreadable = 0usize;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(value) => {
                    if let Some(id) = value.get(id_field).and_then(scalar_key) {
                        ids.push(id);
                    }
                }
                Err(_) => unreadable += 1,
            }
        }
        if unreadable > 0 {
            warn!(path = %self.path.display(), unreadable, "skipped unreadable output lines");
        }
        Ok(ids)
    }
}
