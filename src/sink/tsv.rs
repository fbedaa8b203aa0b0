use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::{RecordSink, SinkError, open_for_append};
use crate::record::Record;

/// Appends records as tab-separated rows under a single header line.
///
/// The header is fixed by the first record ever written to the file: its
/// field names in sorted order, followed by the trailing columns (enrichment
/// fields). Reopening an existing file reuses its header. Fields outside the
/// header are not written; missing fields become empty cells.
#[derive(Debug)]
pub struct TsvSink {
    writer: BufWriter<File>,
    path: PathBuf,
    header: Option<Vec<String>>,
    trailing_columns: Vec<String>,
}

impl TsvSink {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened or repaired.
    #[instrument(skip(trailing_columns), fields(path = %path.display()))]
    pub async fn open(path: &Path, trailing_columns: Vec<String>) -> Result<Self, SinkError> {
        let target = open_for_append(path).await?;
        let header = target
            .first_line
            .as_deref()
            .map(|line| line.split('\t').map(str::to_string).collect::<Vec<_>>());

        debug!(reused_header = header.is_some(), "opened TSV sink");
        Ok(Self {
            writer: BufWriter::new(target.file),
            path: target.path,
            header,
            trailing_columns,
        })
    }

    /// Returns the header, once known.
    #[must_use]
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    fn header_for(&self, record: &Record) -> Vec<String> {
        let mut columns: Vec<String> = record
            .fields()
            .keys()
            .filter(|key| !self.trailing_columns.contains(key))
            .cloned()
            .collect();
        columns.sort();
        columns.extend(self.trailing_columns.iter().cloned());
        columns
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SinkError> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::io(&self.path, e))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| SinkError::io(&self.path, e))
    }
}

/// Renders one cell. Tabs and line breaks would break the row layout.
fn cell(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    text.replace(['\t', '\n', '\r'], " ")
}

#[async_trait]
impl RecordSink for TsvSink {
    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let header = match &self.header {
            Some(header) => header.clone(),
            None => {
                let header = self.header_for(record);
                self.write_line(&header.join("\t")).await?;
                self.header = Some(header.clone());
                header
            }
        };

        let row = header
            .iter()
            .map(|column| cell(record.get(column)))
            .collect::<Vec<_>>()
            .join("\t");
        self.write_line(&row).await
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

        let mut lines = content.lines();
        let Some(index) = lines
            .next()
            .and_then(|header| header.split('\t').position(|c| c == id_field))
        else {
            return Ok(Vec::new());
        };

        Ok(lines
            .filter_map(|line| line.split('\t').nth(index))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::record::RecordSchema;

    fn record(value: Value) -> Record {
        Record::from_value(value, &RecordSchema::default()).unwrap()
    }

    #[test]
    fn test_cell_flattens_separators() {
        assert_eq!(cell(Some(&json!("a\tb\nc\r\nd"))), "a b c  d");
        assert_eq!(cell(Some(&json!(4.5))), "4.5");
        assert_eq!(cell(Some(&Value::Null)), "");
        assert_eq!(cell(None), "");
    }

    #[tokio::test]
    async fn test_header_sorted_with_trailing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");

        let mut sink = TsvSink::open(&path, vec!["submitted_date".to_string()])
            .await
            .unwrap();
        let mut first = record(json!({
            "title": "Song\tName",
            "beatmap_id": "1",
            "approved_date": "2020-01-01 00:00:00",
        }));
        first.insert_field("submitted_date", json!("2019-12-01"));
        sink.write(&first).await.unwrap();
        sink.write(&record(json!({
            "beatmap_id": "2",
            "approved_date": "2020-01-01 00:00:01",
        })))
        .await
        .unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "approved_date\tbeatmap_id\ttitle\tsubmitted_date");
        assert_eq!(lines[1], "2020-01-01 00:00:00\t1\tSong Name\t2019-12-01");
        assert_eq!(lines[2], "2020-01-01 00:00:01\t2\t\t");
    }

    #[tokio::test]
    async fn test_reopen_reuses_header_and_reports_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");

        let mut first = TsvSink::open(&path, Vec::new()).await.unwrap();
        first
            .write(&record(json!({"beatmap_id": "1", "approved_date": "2020-01-01", "b": 1})))
            .await
            .unwrap();
        first.flush().await.unwrap();
        drop(first);

        let mut second = TsvSink::open(&path, Vec::new()).await.unwrap();
        assert_eq!(
            second.header().unwrap(),
            ["approved_date", "b", "beatmap_id"].map(String::from)
        );
        second
            .write(&record(json!({"beatmap_id": "2", "approved_date": "2020-01-02", "a": 0})))
            .await
            .unwrap();

        let ids = second.written_ids("beatmap_id").await.unwrap();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.starts_with("approved_date")).count(), 1);
    }
}
