//! Integration tests for the resumable paginator.
//!
//! These run the full fetch -> dedup -> sink -> checkpoint loop against a
//! simulated source that follows the remote's paging rules.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use harvester_core::{
    BatchFetcher, Cursor, CursorPaginator, CursorStore, Enrichment, FileCursorStore,
    FetchError, HarvestError, JsonLinesSink, MemoryCursorStore, PageSource, PaginatorOptions,
    PaginatorState, Record, RecordSink, RoundThrottle, SinkError, SqliteCursorStore,
};
use serde_json::json;
use support::{CrashingSink, FakeEnricher, MemorySink, SimulatedSource, beatmap, jsonl_ids};
use tempfile::TempDir;

fn start() -> Cursor {
    Cursor::parse("2020-01-01 00:00:00").unwrap()
}

fn options(page_size: usize) -> PaginatorOptions {
    let mut options = PaginatorOptions::new(start());
    options.page_size = page_size;
    options.reattempt_delay = Duration::ZERO;
    options
}

/// 499 records spread over the first day, then one at 10:00:00 (ending a
/// full page) and two more shortly after.
fn scenario_records() -> Vec<serde_json::Value> {
    let day_start = Cursor::parse("2020-01-01 00:00:00").unwrap().timestamp();
    let mut records: Vec<_> = (1..=499u32)
        .map(|id| {
            let at = day_start + chrono::TimeDelta::minutes(i64::from(id));
            beatmap(id, id / 4, &at.format("%Y-%m-%d %H:%M:%S").to_string())
        })
        .collect();
    records.push(beatmap(500, 200, "2020-01-02 10:00:00"));
    records.push(beatmap(501, 200, "2020-01-02 10:00:01"));
    records.push(beatmap(502, 201, "2020-01-02 10:00:03"));
    records
}

/// Records sharing timestamps in small groups, to exercise overlapping pages.
fn clustered_records(count: u32) -> Vec<serde_json::Value> {
    (1..=count)
        .map(|id| {
            let minute = id / 3;
            beatmap(id, id / 5, &format!("2020-02-01 {:02}:{:02}:00", minute / 60, minute % 60))
        })
        .collect()
}

#[tokio::test]
async fn test_scenario_full_page_then_partial_then_empty() {
    let source = Arc::new(SimulatedSource::new(scenario_records(), 500));
    let store = Arc::new(MemoryCursorStore::new());
    let mut sink = MemorySink::default();

    let paginator = CursorPaginator::new(source.clone(), store.clone(), options(500));
    let summary = paginator.run(&mut sink).await.unwrap();

    assert_eq!(
        source.asked(),
        vec![
            "2020-01-01 00:00:00",
            "2020-01-02 09:59:59",
            "2020-01-02 10:00:03"
        ]
    );
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.written, 502);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.final_cursor.unwrap().as_str(), "2020-01-02 10:00:03");
    assert_eq!(summary.state, PaginatorState::Done);
    assert_eq!(paginator.state(), PaginatorState::Done);

    let ids: HashSet<_> = sink.ids().into_iter().collect();
    assert_eq!(ids.len(), 502);
    assert_eq!(sink.records.len(), 502);

    let saved = store.snapshot().await.unwrap();
    assert_eq!(saved.cursor.unwrap().as_str(), "2020-01-02 10:00:03");
    assert_eq!(saved.seen_ids.len(), 502);
}

#[tokio::test]
async fn test_cursors_never_move_backwards_except_rewind() {
    let source = Arc::new(SimulatedSource::new(clustered_records(200), 7));
    let summary = CursorPaginator::new(source, Arc::new(MemoryCursorStore::new()), options(7))
        .run(&mut MemorySink::default())
        .await
        .unwrap();

    let cursors = &summary.cursors_used;
    assert!(cursors.len() > 20);
    for pair in cursors.windows(2) {
        assert!(pair[1] >= pair[0], "cursor went back: {} -> {}", pair[0], pair[1]);
    }
    assert_eq!(summary.written, 200);
}

#[tokio::test]
async fn test_empty_source_terminates_after_one_fetch() {
    let source = Arc::new(SimulatedSource::new(Vec::new(), 500));
    let store = Arc::new(MemoryCursorStore::new());
    let mut sink = MemorySink::default();

    let summary = CursorPaginator::new(source.clone(), store.clone(), options(500))
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(source.asked().len(), 1);
    assert_eq!(summary.pages, 0);
    assert_eq!(summary.state, PaginatorState::Done);
    assert_eq!(sink.flushes, 1);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_second_run_writes_nothing_new() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn CursorStore> = Arc::new(FileCursorStore::new(dir.path().join("p.json")));
    let source = Arc::new(SimulatedSource::new(clustered_records(60), 10));

    let mut first = MemorySink::default();
    CursorPaginator::new(source.clone(), Arc::clone(&store), options(10))
        .run(&mut first)
        .await
        .unwrap();
    assert_eq!(first.records.len(), 60);

    let mut second = MemorySink::default();
    let summary = CursorPaginator::new(source, store, options(10))
        .run(&mut second)
        .await
        .unwrap();
    assert!(second.records.is_empty());
    assert_eq!(summary.pages, 0);
}

#[tokio::test]
async fn test_crash_then_resume_writes_each_record_once() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("beatmaps.jsonl");
    let checkpoint = dir.path().join("progress.json");
    let records = clustered_records(95);

    // First run dies after making page 3 durable but before checkpointing it.
    let source = Arc::new(SimulatedSource::new(records.clone(), 10));
    let mut crashing = CrashingSink::open(&output, 3).await;
    let result = CursorPaginator::new(
        source,
        Arc::new(FileCursorStore::new(&checkpoint)),
        options(10),
    )
    .run(&mut crashing)
    .await;
    assert!(matches!(result, Err(HarvestError::Sink(_))));
    drop(crashing);

    let before_resume = jsonl_ids(&output, "beatmap_id");
    assert!(!before_resume.is_empty());

    // Resume with a fresh process state.
    let source = Arc::new(SimulatedSource::new(records, 10));
    let mut sink = JsonLinesSink::open(&output).await.unwrap();
    let summary = CursorPaginator::new(
        source,
        Arc::new(FileCursorStore::new(&checkpoint)),
        options(10),
    )
    .run(&mut sink)
    .await
    .unwrap();
    assert!(summary.recovered_ids > 0);

    let ids = jsonl_ids(&output, "beatmap_id");
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 95, "every record written exactly once");
    assert_eq!(distinct.len(), 95);
}

#[tokio::test]
async fn test_transport_failure_keeps_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteCursorStore::open(&dir.path().join("p.db")).await.unwrap());
    let source = Arc::new(SimulatedSource::new(clustered_records(30), 10));
    for call in 2..=4 {
        source.fail_call(call, 502);
    }

    let result = CursorPaginator::new(source.clone(), store.clone(), options(10))
        .run(&mut MemorySink::default())
        .await;
    assert!(matches!(result, Err(HarvestError::Transport { attempts: 3, .. })));

    let saved = store.load().await.unwrap().unwrap();
    assert_eq!(saved.seen_ids.len(), 10);
    let resume_at = saved.cursor.unwrap();

    // The next run starts exactly where the failed one stopped.
    let mut sink = MemorySink::default();
    CursorPaginator::new(source.clone(), store, options(10))
        .run(&mut sink)
        .await
        .unwrap();
    assert_eq!(source.asked()[4], resume_at.as_str());
    assert_eq!(sink.records.len(), 20);
}

#[tokio::test]
async fn test_remote_error_payload_aborts() {
    struct Rejecting;

    #[async_trait::async_trait]
    impl PageSource for Rejecting {
        async fn fetch_page(&self, _cursor: &Cursor) -> Result<Vec<serde_json::Value>, FetchError> {
            Err(FetchError::remote("api", "Please provide a valid API key."))
        }
    }

    let store = Arc::new(MemoryCursorStore::new());
    let paginator = CursorPaginator::new(Arc::new(Rejecting), store.clone(), options(500));
    let result = paginator.run(&mut MemorySink::default()).await;

    assert!(matches!(result, Err(HarvestError::Remote { .. })));
    assert_eq!(paginator.state(), PaginatorState::Error);
    assert!(store.snapshot().await.is_none());
}

#[tokio::test]
async fn test_stop_flag_ends_after_current_page() {
    let source = Arc::new(SimulatedSource::new(clustered_records(50), 10));
    let stop = Arc::new(AtomicBool::new(false));

    struct StopAfterFirstFlush {
        inner: MemorySink,
        stop: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl RecordSink for StopAfterFirstFlush {
        async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
            self.inner.write(record).await
        }

        async fn flush(&mut self) -> Result<(), SinkError> {
            self.stop.store(true, Ordering::SeqCst);
            self.inner.flush().await
        }
    }

    let store = Arc::new(MemoryCursorStore::new());
    let mut sink = StopAfterFirstFlush {
        inner: MemorySink::default(),
        stop: Arc::clone(&stop),
    };
    let summary = CursorPaginator::new(source, store.clone(), options(10))
        .with_stop_flag(stop)
        .run(&mut sink)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.pages, 1);
    assert_eq!(store.save_count(), 1);
    assert_eq!(sink.inner.records.len(), 10);
}

#[tokio::test]
async fn test_enrichment_fetches_each_group_once_and_retries_failures() {
    let records = vec![
        beatmap(1, 10, "2020-03-01 00:00:01"),
        beatmap(2, 10, "2020-03-01 00:00:02"),
        beatmap(3, 11, "2020-03-01 00:00:03"),
        beatmap(4, 12, "2020-03-01 00:00:04"),
        beatmap(5, 11, "2020-03-01 00:00:05"),
        beatmap(6, 12, "2020-03-01 00:00:06"),
    ];
    let source = Arc::new(SimulatedSource::new(records, 3));
    let enricher = Arc::new(FakeEnricher::failing_once(&["12"]));
    let fetcher = BatchFetcher::new(10, 4, Arc::new(RoundThrottle::disabled())).unwrap();
    let store = Arc::new(MemoryCursorStore::new());
    let mut sink = MemorySink::default();

    let summary = CursorPaginator::new(source, store.clone(), options(3))
        .with_enrichment(Enrichment::new(enricher.clone(), fetcher, "submitted_date"))
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(summary.written, 6);
    assert_eq!(summary.enrichment_failures, 1);

    let by_id = |id: &str| {
        sink.records
            .iter()
            .find(|r| r.id() == id)
            .and_then(|r| r.get("submitted_date").cloned())
    };
    assert_eq!(by_id("1"), Some(json!("submitted-10")));
    assert_eq!(by_id("3"), Some(json!("submitted-11")));
    assert_eq!(by_id("4"), None, "failed group is written without the field");
    assert_eq!(by_id("6"), Some(json!("submitted-12")), "failed group retried later");

    // 10, 11, 12 (failed), then 12 again on the next page.
    let mut keys = enricher.keys.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys, vec!["10", "11", "12", "12"]);

    let saved = store.snapshot().await.unwrap();
    assert_eq!(saved.aux_cache.len(), 3);
}

/// Memory sink that refuses to write the given ids.
struct RefusingSink {
    inner: MemorySink,
    refuse: HashSet<String>,
}

#[async_trait::async_trait]
impl RecordSink for RefusingSink {
    async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        if self.refuse.contains(record.id()) {
            return Err(SinkError::Io {
                path: "refusing".to_string(),
                source: std::io::Error::other("no space left on device"),
            });
        }
        self.inner.write(record).await
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await
    }
}

#[tokio::test]
async fn test_failed_write_is_retried_by_next_run() {
    let records = vec![
        beatmap(1, 1, "2020-01-02 00:00:00"),
        beatmap(2, 1, "2020-01-02 00:00:01"),
        beatmap(3, 1, "2020-01-02 00:00:02"),
    ];
    let source = Arc::new(SimulatedSource::new(records, 500));
    let store = Arc::new(MemoryCursorStore::new());

    let mut first_sink = RefusingSink {
        inner: MemorySink::default(),
        refuse: HashSet::from(["1".to_string()]),
    };
    let first = CursorPaginator::new(source.clone(), store.clone(), options(500))
        .run(&mut first_sink)
        .await
        .unwrap();

    assert_eq!(first_sink.inner.ids(), vec!["2", "3"]);
    assert!(first.write_failures >= 1);
    let held = first.final_cursor.unwrap();
    assert!(
        held < Cursor::parse("2020-01-02 00:00:00").unwrap(),
        "cursor moved past the unwritten record: {held}"
    );

    let mut second_sink = MemorySink::default();
    let second = CursorPaginator::new(source, store.clone(), options(500))
        .run(&mut second_sink)
        .await
        .unwrap();

    assert_eq!(second_sink.ids(), vec!["1"]);
    assert_eq!(second.write_failures, 0);
    assert_eq!(second.final_cursor.unwrap().as_str(), "2020-01-02 00:00:02");

    let saved = store.snapshot().await.unwrap();
    let mut seen: Vec<_> = saved.seen_ids.into_iter().collect();
    seen.sort();
    assert_eq!(seen, vec!["1", "2", "3"]);
}
