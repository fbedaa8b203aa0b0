//! Harvester Core Library
//!
//! Incrementally harvests a paginated, rate-limited remote source into a
//! local dataset, resuming after restarts without re-fetching or duplicating
//! records.
//!
//! # Architecture
//!
//! - [`paginator`] - resumable cursor pagination loop
//! - [`entities`] - per-entity batch harvesting with requeue
//! - [`batch`] - bounded-concurrency rounds with a fixed-rate throttle
//! - [`dedup`] - cross-run record deduplication
//! - [`checkpoint`] - durable progress (JSON file, SQLite, memory)
//! - [`sink`] - record output (JSON Lines, TSV)
//! - [`fetch`] - source interfaces and their HTTP implementations
//! - [`cursor`], [`record`] - the values flowing between them

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod checkpoint;
pub mod cursor;
pub mod db;
pub mod dedup;
pub mod entities;
pub mod error;
pub mod fetch;
pub mod paginator;
pub mod record;
pub mod sink;

// Re-export commonly used types
pub use batch::{
    BatchError, BatchFetcher, BatchStats, DEFAULT_BATCH_SIZE, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_ROUND_INTERVAL, FailureType, ItemFailure, RequeueDecision,
    RequeuePolicy, RoundOutcome, RoundThrottle, classify_error,
};
pub use checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, CheckpointError, CursorStore, FileCursorStore,
    MemoryCursorStore, SqliteCursorStore,
};
pub use cursor::{CURSOR_FORMAT, Cursor, CursorError};
pub use db::{Database, DbError};
pub use dedup::{Deduplicator, WriteOutcome};
pub use entities::{EntityHarvester, EntityOptions, EntitySummary};
pub use error::HarvestError;
pub use fetch::{
    ApiClient, EntityEndpoint, Enricher, FetchError, HtmlScriptEnricher, HttpTimeouts,
    ItemSource, PageSource, PagedEndpoint,
};
pub use paginator::{
    CursorPaginator, DEFAULT_PAGE_SIZE, DEFAULT_START_CURSOR, Enrichment, PaginatorOptions,
    PaginatorState, RunSummary,
};
pub use record::{Record, RecordError, RecordSchema};
pub use sink::{JsonLinesSink, RecordSink, SinkError, SinkFormat, TsvSink, open_sink};
