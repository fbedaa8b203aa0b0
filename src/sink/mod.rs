//! Record output.
//!
//! A [`RecordSink`] receives records one by one and a `flush` at every page or
//! round boundary. After `flush` returns, everything written so far must be
//! durable; the harvester only checkpoints after a successful flush.

mod jsonl;
mod tsv;

pub use jsonl::JsonLinesSink;
pub use tsv::TsvSink;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tracing::warn;

use crate::record::Record;

/// Errors raised by record sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Reading or writing the output file failed.
    #[error("sink I/O failed for {path}: {source}")]
    Io {
        /// Output file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to encode record '{id}': {source}")]
    Encode {
        /// Identifier of the record.
        id: String,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl SinkError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Destination for harvested records.
#[async_trait]
pub trait RecordSink: Send {
    /// Writes one record.
    async fn write(&mut self, record: &Record) -> Result<(), SinkError>;

    /// Marks a batch boundary; everything written so far becomes durable.
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Returns the identifiers (read from `id_field`) already present in the
    /// output. Sinks that cannot read their output back return nothing.
    async fn written_ids(&mut self, _id_field: &str) -> Result<Vec<String>, SinkError> {
        Ok(Vec::new())
    }
}

/// Output formats supported by [`open_sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    /// One JSON object per line.
    JsonLines,
    /// Tab-separated values with a header row.
    Tsv,
}

/// Opens a file sink of the given format.
///
/// `trailing_columns` only applies to TSV, where those columns are placed
/// after the record's own fields.
///
/// # Errors
///
/// Returns [`SinkError::Io`] if the file cannot be opened or repaired.
pub async fn open_sink(
    format: SinkFormat,
    path: &Path,
    trailing_columns: Vec<String>,
) -> Result<Box<dyn RecordSink>, SinkError> {
    Ok(match format {
        SinkFormat::JsonLines => Box::new(JsonLinesSink::open(path).await?),
        SinkFormat::Tsv => Box::new(TsvSink::open(path, trailing_columns).await?),
    })
}

/// Output file opened for appending, with its intact first line.
pub(crate) struct AppendTarget {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    /// First complete line of the existing content, if any.
    pub(crate) first_line: Option<String>,
    /// Length in bytes of the intact existing content.
    pub(crate) existing_len: u64,
}

/// Opens `path` for appending after cutting off any incomplete last line.
///
/// A crash between two writes can leave a partial line at the end of the
/// file; that line was never flushed, so it is dropped and the record will be
/// written again.
pub(crate) async fn open_for_append(path: &Path) -> Result<AppendTarget, SinkError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SinkError::io(parent, e))?;
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(SinkError::io(path, e)),
    };

    let intact = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| SinkError::io(path, e))?;

    if intact < bytes.len() {
        warn!(
            path = %path.display(),
            dropped_bytes = bytes.len() - intact,
            "dropping incomplete trailing line"
        );
        file.set_len(intact as u64)
            .await
            .map_err(|e| SinkError::io(path, e))?;
    }

    let first_line = bytes[..intact]
        .split(|&b| b == b'\n')
        .next()
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).into_owned());

    Ok(AppendTarget {
        file,
        path: path.to_path_buf(),
        first_line,
        existing_len: intact as u64,
    })
}
