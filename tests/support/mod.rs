//! Shared fakes for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use harvester_core::{
    Cursor, Enricher, FetchError, JsonLinesSink, PageSource, Record, RecordSink, SinkError,
};
use serde_json::{Value, json};

/// In-memory source with the remote's paging rules: records strictly after
/// the cursor, in timestamp order, at most `page_size` per page.
pub struct SimulatedSource {
    records: Vec<Value>,
    page_size: usize,
    cursor_field: String,
    asked: Mutex<Vec<String>>,
    fail_calls: Mutex<HashMap<usize, u16>>,
}

impl SimulatedSource {
    pub fn new(mut records: Vec<Value>, page_size: usize) -> Self {
        records.sort_by_key(|r| ts(r, "approved_date"));
        Self {
            records,
            page_size,
            cursor_field: "approved_date".to_string(),
            asked: Mutex::new(Vec::new()),
            fail_calls: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the `call`-th request (1-based) answer with HTTP `status`.
    pub fn fail_call(&self, call: usize, status: u16) {
        self.fail_calls.lock().unwrap().insert(call, status);
    }

    /// Cursors requested so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for SimulatedSource {
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Vec<Value>, FetchError> {
        let call = {
            let mut asked = self.asked.lock().unwrap();
            asked.push(cursor.as_str().to_string());
            asked.len()
        };
        if let Some(status) = self.fail_calls.lock().unwrap().remove(&call) {
            return Err(FetchError::http_status("simulated", status));
        }

        Ok(self
            .records
            .iter()
            .filter(|r| ts(r, &self.cursor_field) > *cursor)
            .take(self.page_size)
            .cloned()
            .collect())
    }
}

fn ts(record: &Value, field: &str) -> Cursor {
    Cursor::parse(record[field].as_str().unwrap()).unwrap()
}

/// A beatmap-shaped record.
pub fn beatmap(id: u32, set: u32, approved: &str) -> Value {
    json!({
        "beatmap_id": id.to_string(),
        "beatmapset_id": set.to_string(),
        "approved_date": approved,
        "artist": "Artist",
        "title": format!("Title {id}"),
        "difficultyrating": "4.25",
    })
}

/// Collects written records in memory.
#[derive(Default)]
pub struct MemorySink {
    pub records: Vec<Record>,
    pub flushes: usize,
}

impl MemorySink {
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id().to_string()).collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes += 1;
        Ok(())
    }
}

/// JSON Lines sink that makes its output durable and then fails the
/// `crash_at`-th flush, as if the process died before checkpointing.
pub struct CrashingSink {
    inner: JsonLinesSink,
    flushes: usize,
    crash_at: usize,
}

impl CrashingSink {
    pub async fn open(path: &Path, crash_at: usize) -> Self {
        Self {
            inner: JsonLinesSink::open(path).await.unwrap(),
            flushes: 0,
            crash_at,
        }
    }
}

#[async_trait]
impl RecordSink for CrashingSink {
    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        self.inner.write(record).await
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await?;
        self.flushes += 1;
        if self.flushes == self.crash_at {
            return Err(SinkError::Io {
                path: "crash".to_string(),
                source: std::io::Error::other("simulated crash"),
            });
        }
        Ok(())
    }

    async fn written_ids(&mut self, id_field: &str) -> Result<Vec<String>, SinkError> {
        self.inner.written_ids(id_field).await
    }
}

/// Enricher answering `submitted-<key>`; keys listed in `failing` fail once.
#[derive(Default)]
pub struct FakeEnricher {
    pub failing: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub keys: Mutex<Vec<String>>,
}

impl FakeEnricher {
    pub fn failing_once(keys: &[&str]) -> Self {
        Self {
            failing: Mutex::new(keys.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Enricher for FakeEnricher {
    async fn fetch_aux(&self, key: &str) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(key.to_string());
        let mut failing = self.failing.lock().unwrap();
        if let Some(pos) = failing.iter().position(|k| k == key) {
            failing.remove(pos);
            return Err(FetchError::http_status(key, 503));
        }
        Ok(json!(format!("submitted-{key}")))
    }
}

/// Reads the ids of a JSON Lines output file.
pub fn jsonl_ids(path: &Path, field: &str) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value[field].as_str().unwrap().to_string()
        })
        .collect()
}
