//! Resumable cursor pagination.
//!
//! [`CursorPaginator`] drives the harvest loop:
//!
//! ```text
//! Init -> Fetching -> Processing -> Advancing -> Fetching -> ... -> Done
//!                \________________\____________\__________________-> Error
//! ```
//!
//! Each page is fetched at the current cursor, filtered against the ids
//! already written, optionally enriched, written to the sink and flushed.
//! Only then is the checkpoint saved with the next cursor, so a crash at any
//! point resumes from the last page that was made durable.
//!
//! # Cursor advance
//!
//! The source's `since` parameter is exclusive. A page that hits the size
//! ceiling may have been cut in the middle of a timestamp, so the next cursor
//! is rewound one second before the last record's timestamp; otherwise it is
//! that timestamp itself. The overlap this causes is removed by the
//! deduplicator. More than one page of records sharing one timestamp cannot
//! be paged through; the run stops with a warning when it detects that.
//!
//! A record whose write fails keeps the next cursor one second before its
//! timestamp (but never behind the current cursor), so the record is fetched
//! again by the next page or the next run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchFetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_ATTEMPTS, RoundThrottle};
use crate::checkpoint::{Checkpoint, CursorStore};
use crate::cursor::Cursor;
use crate::dedup::Deduplicator;
use crate::error::HarvestError;
use crate::fetch::{Enricher, FetchError, PageSource};
use crate::record::{Record, RecordSchema};
use crate::sink::RecordSink;

/// Maximum number of records the source returns per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Start cursor used when neither a checkpoint nor a `--since` value exists.
pub const DEFAULT_START_CURSOR: &str = "2007-10-07";

/// Default pause before reattempting a failed page fetch.
pub const DEFAULT_REATTEMPT_DELAY: Duration = Duration::from_secs(1);

/// Phase of a paginator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginatorState {
    /// Loading the checkpoint.
    Init,
    /// Requesting a page.
    Fetching,
    /// Deduplicating, enriching and writing a page.
    Processing,
    /// Computing the next cursor and saving the checkpoint.
    Advancing,
    /// Finished normally.
    Done,
    /// Aborted by an error.
    Error,
}

/// Settings of a paginator run.
#[derive(Debug, Clone)]
pub struct PaginatorOptions {
    /// Cursor to start from when there is no checkpoint.
    pub start_cursor: Cursor,
    /// Page size ceiling of the source.
    pub page_size: usize,
    /// Attempts per page fetch before the run fails.
    pub max_fetch_attempts: u32,
    /// Fixed pause after a failed page fetch attempt. The page throttle set
    /// with [`CursorPaginator::with_page_throttle`] applies on top of it.
    pub reattempt_delay: Duration,
    /// Time budget for one page fetch.
    pub fetch_timeout: Duration,
    /// Stop after this many pages.
    pub max_pages: Option<usize>,
    /// Which record fields hold the id, cursor and group key.
    pub schema: RecordSchema,
}

impl PaginatorOptions {
    /// Creates options with defaults, starting at `start_cursor`.
    #[must_use]
    pub fn new(start_cursor: Cursor) -> Self {
        Self {
            start_cursor,
            page_size: DEFAULT_PAGE_SIZE,
            max_fetch_attempts: DEFAULT_MAX_ATTEMPTS,
            reattempt_delay: DEFAULT_REATTEMPT_DELAY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_pages: None,
            schema: RecordSchema::default(),
        }
    }
}

/// Attaches per-group values to records before they are written.
pub struct Enrichment {
    enricher: Arc<dyn Enricher>,
    fetcher: BatchFetcher,
    field: String,
}

impl std::fmt::Debug for Enrichment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrichment")
            .field("field", &self.field)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Enrichment {
    /// Fetches missing group values through `fetcher` and stores them under `field`.
    #[must_use]
    pub fn new(enricher: Arc<dyn Enricher>, fetcher: BatchFetcher, field: impl Into<String>) -> Self {
        Self {
            enricher,
            fetcher,
            field: field.into(),
        }
    }

    /// Returns the field the values are stored under.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Fills `cache` with values for uncached group keys of `records`, then
    /// attaches cached values. Returns how many group keys could not be
    /// fetched; their records are left without the field.
    async fn apply(
        &self,
        records: &mut [Record],
        schema: &RecordSchema,
        cache: &mut BTreeMap<String, Value>,
    ) -> Result<usize, HarvestError> {
        let mut queued = BTreeSet::new();
        let missing: Vec<String> = records
            .iter()
            .filter_map(|record| record.group_key(schema))
            .filter(|key| !cache.contains_key(key) && queued.insert(key.clone()))
            .collect();

        let mut failed = 0;
        for chunk in missing.chunks(self.fetcher.batch_size()) {
            let enricher = Arc::clone(&self.enricher);
            let outcome = self
                .fetcher
                .run_round(chunk.to_vec(), move |key| {
                    let enricher = Arc::clone(&enricher);
                    async move { enricher.fetch_aux(&key).await }
                })
                .await?;

            cache.extend(outcome.succeeded);
            failed += outcome.failed.len();
        }

        for record in records.iter_mut() {
            if let Some(value) = record.group_key(schema).and_then(|key| cache.get(&key)) {
                let value = value.clone();
                record.insert_field(self.field.clone(), value);
            }
        }

        if !missing.is_empty() {
            debug!(requested = missing.len(), failed, "enrichment round complete");
        }
        Ok(failed)
    }
}

/// Result of a paginator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Non-empty pages processed.
    pub pages: usize,
    /// Records written to the sink.
    pub written: usize,
    /// Delivered records dropped as already written.
    pub duplicates: usize,
    /// Record writes that failed. The saved cursor stays before the earliest
    /// of them, so they are fetched again.
    pub write_failures: usize,
    /// Group keys whose enrichment failed.
    pub enrichment_failures: usize,
    /// Ids found in the sink output but missing from the checkpoint.
    pub recovered_ids: usize,
    /// Every cursor a page was requested at, in order.
    pub cursors_used: Vec<Cursor>,
    /// Cursor saved in the final checkpoint.
    pub final_cursor: Option<Cursor>,
    /// State the run ended in.
    pub state: PaginatorState,
    /// The run ended early because the stop flag was set.
    pub interrupted: bool,
    /// The run ended because the cursor could not move forward, either
    /// because one timestamp holds more than a page of records or because
    /// records at the cursor keep failing to write.
    pub stalled: bool,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            pages: 0,
            written: 0,
            duplicates: 0,
            write_failures: 0,
            enrichment_failures: 0,
            recovered_ids: 0,
            cursors_used: Vec::new(),
            final_cursor: None,
            state: PaginatorState::Init,
            interrupted: false,
            stalled: false,
        }
    }
}

/// Resumable harvester for a cursor-paged source.
pub struct CursorPaginator {
    source: Arc<dyn PageSource>,
    store: Arc<dyn CursorStore>,
    options: PaginatorOptions,
    page_throttle: Arc<RoundThrottle>,
    enrichment: Option<Enrichment>,
    stop: Arc<AtomicBool>,
    state: watch::Sender<PaginatorState>,
}

impl std::fmt::Debug for CursorPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorPaginator")
            .field("options", &self.options)
            .field("enrichment", &self.enrichment)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CursorPaginator {
    /// Creates a paginator over `source`, checkpointing to `store`.
    #[must_use]
    pub fn new(
        source: Arc<dyn PageSource>,
        store: Arc<dyn CursorStore>,
        options: PaginatorOptions,
    ) -> Self {
        let (state, _) = watch::channel(PaginatorState::Init);
        Self {
            source,
            store,
            options,
            page_throttle: Arc::new(RoundThrottle::disabled()),
            enrichment: None,
            stop: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    /// Spaces page fetches with `throttle`, reattempts included. Without it
    /// page fetches are not throttled.
    #[must_use]
    pub fn with_page_throttle(mut self, throttle: Arc<RoundThrottle>) -> Self {
        self.page_throttle = throttle;
        self
    }

    /// Enables enrichment.
    #[must_use]
    pub fn with_enrichment(mut self, enrichment: Enrichment) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    /// Uses `stop` as the cancellation flag, checked between pages.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> PaginatorState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PaginatorState> {
        self.state.subscribe()
    }

    fn enter(&self, state: PaginatorState) {
        self.state.send_replace(state);
    }

    /// Runs until the source is exhausted, the page limit is reached, the
    /// stop flag is set, or an error occurs.
    ///
    /// # Errors
    ///
    /// Returns a [`HarvestError`] when the checkpoint cannot be loaded or
    /// saved, the sink cannot flush, the source reports an error or returns
    /// a malformed page, or a page fetch fails on every attempt.
    #[instrument(skip(self, sink), fields(start = %self.options.start_cursor))]
    pub async fn run(&self, sink: &mut dyn RecordSink) -> Result<RunSummary, HarvestError> {
        match self.run_pages(sink).await {
            Ok(summary) => {
                self.enter(PaginatorState::Done);
                Ok(summary)
            }
            Err(error) => {
                self.enter(PaginatorState::Error);
                warn!(error = %error, "harvest aborted; last checkpoint kept");
                Err(error)
            }
        }
    }

    async fn run_pages(&self, sink: &mut dyn RecordSink) -> Result<RunSummary, HarvestError> {
        if self.options.page_size == 0 {
            return Err(HarvestError::Config("page size must be positive".to_string()));
        }

        self.enter(PaginatorState::Init);
        let schema = &self.options.schema;
        let mut summary = RunSummary::new();

        let mut checkpoint = match self.store.load().await? {
            Some(checkpoint) => {
                info!(
                    cursor = ?checkpoint.cursor.as_ref().map(Cursor::as_str),
                    seen = checkpoint.seen_ids.len(),
                    "resuming from checkpoint"
                );
                checkpoint
            }
            None => {
                info!(cursor = %self.options.start_cursor, "no checkpoint; starting fresh");
                Checkpoint::new(None)
            }
        };
        let mut cursor = checkpoint
            .cursor
            .clone()
            .unwrap_or_else(|| self.options.start_cursor.clone());
        checkpoint.cursor = Some(cursor.clone());

        let before = checkpoint.seen_ids.len();
        checkpoint.seen_ids.extend(sink.written_ids(&schema.id_field).await?);
        summary.recovered_ids = checkpoint.seen_ids.len() - before;
        if summary.recovered_ids > 0 {
            info!(
                recovered = summary.recovered_ids,
                "output holds records written after the last checkpoint"
            );
        }

        let mut dedup = Deduplicator::new();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("stop requested; ending after last checkpoint");
                summary.interrupted = true;
                break;
            }
            if self.options.max_pages.is_some_and(|max| summary.pages >= max) {
                info!(pages = summary.pages, "page limit reached");
                break;
            }

            self.enter(PaginatorState::Fetching);
            summary.cursors_used.push(cursor.clone());
            let raw = self.fetch_page(&cursor).await?;
            if raw.is_empty() {
                info!(cursor = %cursor, "empty page; source exhausted");
                sink.flush().await?;
                break;
            }

            self.enter(PaginatorState::Processing);
            summary.pages += 1;
            let page_len = raw.len();
            let records = raw
                .into_iter()
                .map(|value| Record::from_value(value, schema))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| HarvestError::Malformed {
                    reason: format!("page at {cursor}: {e}"),
                })?;
            let Some(last_ts) = records.last().map(|r| r.cursor().clone()) else {
                break;
            };

            let mut fresh = dedup.filter(records, &checkpoint.seen_ids);
            if let Some(enrichment) = &self.enrichment {
                summary.enrichment_failures += enrichment
                    .apply(&mut fresh, schema, &mut checkpoint.aux_cache)
                    .await?;
            }
            let outcome = dedup
                .write_fresh(&fresh, sink, &mut checkpoint.seen_ids)
                .await;
            let written = outcome.written;
            sink.flush().await?;

            self.enter(PaginatorState::Advancing);
            let mut next = if page_len >= self.options.page_size {
                last_ts.rewind_one_unit()?
            } else {
                last_ts
            };
            // An unwritten record must stay after the saved cursor.
            if let Some(failed_at) = &outcome.earliest_failure {
                let held = failed_at.rewind_one_unit()?;
                if held < next {
                    debug!(failed_at = %failed_at, held = %held, "holding cursor before unwritten record");
                    next = held;
                }
            }
            if next <= cursor {
                if written == 0 {
                    if outcome.earliest_failure.is_some() {
                        warn!(
                            cursor = %cursor,
                            "cursor held by records that keep failing to write; ending run"
                        );
                    } else {
                        warn!(
                            cursor = %cursor,
                            page_len,
                            "cursor cannot advance; more records share one timestamp than fit in a page"
                        );
                    }
                    summary.stalled = true;
                }
                next = cursor.clone();
            }

            checkpoint.cursor = Some(next.clone());
            self.store.save(&checkpoint).await?;
            info!(
                page = summary.pages,
                records = page_len,
                written,
                next = %next,
                "page checkpointed"
            );
            cursor = next;

            if summary.stalled {
                break;
            }
        }

        summary.written = dedup.written();
        summary.duplicates = dedup.duplicates();
        summary.write_failures = dedup.write_failures();
        summary.final_cursor = Some(cursor);
        summary.state = PaginatorState::Done;
        Ok(summary)
    }

    /// Fetches one page, reattempting transport failures after
    /// `reattempt_delay`. Each attempt first waits on the page throttle.
    async fn fetch_page(&self, cursor: &Cursor) -> Result<Vec<Value>, HarvestError> {
        let max_attempts = self.options.max_fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.page_throttle.acquire().await;

            let result =
                match tokio::time::timeout(self.options.fetch_timeout, self.source.fetch_page(cursor))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::timeout(format!("page at {cursor}"))),
                };

            let error = match result {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };
            if let Some(fatal) = HarvestError::from_fatal_fetch(&error) {
                return Err(fatal);
            }
            if attempt >= max_attempts {
                return Err(HarvestError::Transport {
                    attempts: attempt,
                    source: error,
                });
            }

            warn!(attempt, max_attempts, error = %error, "page fetch failed; reattempting");
            tokio::time::sleep(self.options.reattempt_delay).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::checkpoint::MemoryCursorStore;
    use crate::sink::SinkError;

    /// Replays canned responses and records the cursors it was asked for.
    struct Canned {
        responses: Mutex<VecDeque<Result<Vec<Value>, FetchError>>>,
        asked: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(responses: Vec<Result<Vec<Value>, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                asked: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PageSource for Canned {
        async fn fetch_page(&self, cursor: &Cursor) -> Result<Vec<Value>, FetchError> {
            self.asked.lock().unwrap().push(cursor.as_str().to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct Collect(Vec<String>);

    #[async_trait]
    impl RecordSink for Collect {
        async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
            self.0.push(record.id().to_string());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn rec(id: u32, ts: &str) -> Value {
        json!({"beatmap_id": id.to_string(), "beatmapset_id": "1", "approved_date": ts})
    }

    fn options(page_size: usize) -> PaginatorOptions {
        let mut options = PaginatorOptions::new(Cursor::parse("2020-01-01 00:00:00").unwrap());
        options.page_size = page_size;
        options.reattempt_delay = Duration::ZERO;
        options
    }

    #[tokio::test]
    async fn test_full_page_rewinds_one_second() {
        let source = Canned::new(vec![
            Ok(vec![rec(1, "2020-01-02 09:00:00"), rec(2, "2020-01-02 10:00:00")]),
            Ok(vec![rec(2, "2020-01-02 10:00:00"), rec(3, "2020-01-02 10:00:03")]),
            Ok(Vec::new()),
        ]);
        let store = Arc::new(MemoryCursorStore::new());
        let mut sink = Collect::default();

        let summary = CursorPaginator::new(source.clone(), store.clone(), options(2))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(
            *source.asked.lock().unwrap(),
            vec!["2020-01-01 00:00:00", "2020-01-02 09:59:59", "2020-01-02 10:00:02"]
        );
        assert_eq!(sink.0, vec!["1", "2", "3"]);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.state, PaginatorState::Done);
    }

    #[tokio::test]
    async fn test_partial_page_advances_to_last_timestamp() {
        let source = Canned::new(vec![Ok(vec![rec(1, "2020-01-05 12:00:00")]), Ok(Vec::new())]);
        let store = Arc::new(MemoryCursorStore::new());

        let summary = CursorPaginator::new(source, store.clone(), options(500))
            .run(&mut Collect::default())
            .await
            .unwrap();

        assert_eq!(summary.final_cursor.unwrap().as_str(), "2020-01-05 12:00:00");
        let saved = store.snapshot().await.unwrap();
        assert_eq!(saved.cursor.unwrap().as_str(), "2020-01-05 12:00:00");
        assert!(saved.seen_ids.contains("1"));
    }

    #[tokio::test]
    async fn test_remote_error_aborts_without_retry() {
        let source = Canned::new(vec![Err(FetchError::remote("api", "invalid key"))]);
        let paginator =
            CursorPaginator::new(source.clone(), Arc::new(MemoryCursorStore::new()), options(500));

        let result = paginator.run(&mut Collect::default()).await;
        assert!(matches!(result, Err(HarvestError::Remote { .. })));
        assert_eq!(paginator.state(), PaginatorState::Error);
        assert_eq!(source.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reattempted() {
        let source = Canned::new(vec![
            Err(FetchError::http_status("api", 502)),
            Ok(vec![rec(1, "2020-01-03 00:00:00")]),
            Ok(Vec::new()),
        ]);
        let summary = CursorPaginator::new(source, Arc::new(MemoryCursorStore::new()), options(500))
            .run(&mut Collect::default())
            .await
            .unwrap();
        assert_eq!(summary.written, 1);
    }

    #[tokio::test]
    async fn test_reattempts_wait_reattempt_delay() {
        let source = Canned::new(vec![
            Err(FetchError::http_status("api", 503)),
            Err(FetchError::http_status("api", 503)),
            Ok(Vec::new()),
        ]);
        let mut opts = options(500);
        opts.reattempt_delay = Duration::from_millis(40);

        let started = std::time::Instant::now();
        CursorPaginator::new(source.clone(), Arc::new(MemoryCursorStore::new()), opts)
            .run(&mut Collect::default())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(source.asked.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_attempts() {
        let source = Canned::new(vec![
            Err(FetchError::timeout("api")),
            Err(FetchError::timeout("api")),
            Err(FetchError::timeout("api")),
        ]);
        let store = Arc::new(MemoryCursorStore::new());
        let result = CursorPaginator::new(source, store.clone(), options(500))
            .run(&mut Collect::default())
            .await;

        assert!(matches!(result, Err(HarvestError::Transport { attempts: 3, .. })));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_cursor_ends_run() {
        // Full pages that never get past one timestamp.
        let page = vec![rec(1, "2020-01-01 00:00:01"), rec(2, "2020-01-01 00:00:01")];
        let source = Canned::new(vec![Ok(page.clone()), Ok(page.clone()), Ok(page)]);

        let summary = CursorPaginator::new(source.clone(), Arc::new(MemoryCursorStore::new()), options(2))
            .run(&mut Collect::default())
            .await
            .unwrap();

        assert!(summary.stalled);
        assert_eq!(summary.written, 2);
        assert_eq!(source.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_flag_checked_between_pages() {
        let source = Canned::new(vec![Ok(vec![rec(1, "2020-01-02 00:00:00")])]);
        let stop = Arc::new(AtomicBool::new(true));

        let summary = CursorPaginator::new(source.clone(), Arc::new(MemoryCursorStore::new()), options(500))
            .with_stop_flag(stop)
            .run(&mut Collect::default())
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert!(source.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_pages_limits_run() {
        let source = Canned::new(vec![
            Ok(vec![rec(1, "2020-01-02 00:00:00")]),
            Ok(vec![rec(2, "2020-01-03 00:00:00")]),
        ]);
        let mut opts = options(500);
        opts.max_pages = Some(1);

        let summary = CursorPaginator::new(source, Arc::new(MemoryCursorStore::new()), opts)
            .run(&mut Collect::default())
            .await
            .unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.final_cursor.unwrap().as_str(), "2020-01-02 00:00:00");
    }

    #[tokio::test]
    async fn test_failed_write_holds_cursor_before_record() {
        /// Rejects one id every time.
        struct Rejecting(&'static str, Vec<String>);

        #[async_trait]
        impl RecordSink for Rejecting {
            async fn write(&mut self, record: &Record) -> Result<(), SinkError> {
                if record.id() == self.0 {
                    return Err(SinkError::Io {
                        path: "out".to_string(),
                        source: std::io::Error::other("disk full"),
                    });
                }
                self.1.push(record.id().to_string());
                Ok(())
            }

            async fn flush(&mut self) -> Result<(), SinkError> {
                Ok(())
            }
        }

        let page = vec![
            rec(1, "2020-01-02 00:00:00"),
            rec(2, "2020-01-02 00:00:01"),
            rec(3, "2020-01-02 00:00:02"),
        ];
        let source = Canned::new(vec![Ok(page.clone()), Ok(page)]);
        let store = Arc::new(MemoryCursorStore::new());
        let mut sink = Rejecting("1", Vec::new());

        let summary = CursorPaginator::new(source.clone(), store.clone(), options(500))
            .run(&mut sink)
            .await
            .unwrap();

        assert_eq!(sink.1, vec!["2", "3"]);
        assert_eq!(summary.write_failures, 2);
        assert!(summary.stalled);
        assert_eq!(
            *source.asked.lock().unwrap(),
            vec!["2020-01-01 00:00:00", "2020-01-01 23:59:59"]
        );
        let saved = store.snapshot().await.unwrap();
        assert_eq!(saved.cursor.unwrap().as_str(), "2020-01-01 23:59:59");
        assert!(!saved.seen_ids.contains("1"));
    }

    #[tokio::test]
    async fn test_failed_write_never_moves_cursor_backwards() {
        struct RejectAll;

        #[async_trait]
        impl RecordSink for RejectAll {
            async fn write(&mut self, _record: &Record) -> Result<(), SinkError> {
                Err(SinkError::Io {
                    path: "out".to_string(),
                    source: std::io::Error::other("read-only"),
                })
            }

            async fn flush(&mut self) -> Result<(), SinkError> {
                Ok(())
            }
        }

        // Failed record one second after the cursor: holding would land on
        // the cursor itself.
        let source = Canned::new(vec![Ok(vec![rec(1, "2020-01-01 00:00:01")])]);
        let store = Arc::new(MemoryCursorStore::new());

        let summary = CursorPaginator::new(source, store.clone(), options(500))
            .run(&mut RejectAll)
            .await
            .unwrap();

        assert!(summary.stalled);
        assert_eq!(summary.final_cursor.unwrap().as_str(), "2020-01-01 00:00:00");
        let saved = store.snapshot().await.unwrap();
        assert_eq!(saved.cursor.unwrap().as_str(), "2020-01-01 00:00:00");
    }

    #[tokio::test]
    async fn test_record_without_cursor_is_malformed() {
        let source = Canned::new(vec![Ok(vec![json!({"beatmap_id": "1"})])]);
        let result = CursorPaginator::new(source, Arc::new(MemoryCursorStore::new()), options(500))
            .run(&mut Collect::default())
            .await;
        assert!(matches!(result, Err(HarvestError::Malformed { .. })));
    }
}
