//! Cross-run record deduplication.
//!
//! Pages overlap on purpose (the cursor is rewound after a full page) and a
//! resumed run re-reads the page it crashed in, so the same record is
//! delivered more than once. The [`Deduplicator`] drops records whose id was
//! already written and marks ids only once their write succeeded, which
//! makes each record land in the output exactly once.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::cursor::Cursor;
use crate::record::Record;
use crate::sink::RecordSink;

/// Result of writing one batch of fresh records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Records written.
    pub written: usize,
    /// Smallest cursor among the records whose write failed.
    pub earliest_failure: Option<Cursor>,
}

/// Filters pages against the seen set and records successful writes.
///
/// Keeps counters across all pages of a run.
#[derive(Debug, Default)]
pub struct Deduplicator {
    duplicates: usize,
    written: usize,
    write_failures: usize,
}

impl Deduplicator {
    /// Creates a deduplicator with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records of `page` whose ids are not in `seen_ids`, in page
    /// order. An id repeated inside the page is kept only at its first
    /// position.
    pub fn filter(&mut self, page: Vec<Record>, seen_ids: &BTreeSet<String>) -> Vec<Record> {
        let total = page.len();
        let mut in_page = HashSet::with_capacity(total);
        let fresh: Vec<Record> = page
            .into_iter()
            .filter(|record| !seen_ids.contains(record.id()) && in_page.insert(record.id().to_string()))
            .collect();

        let skipped = total - fresh.len();
        self.duplicates += skipped;
        if skipped > 0 {
            debug!(skipped, fresh = fresh.len(), "dropped already-seen records");
        }
        fresh
    }

    /// Writes `records` in order and adds each successfully written id to
    /// `seen_ids`. A failed write is logged and counted; its id stays unmarked
    /// and its cursor is reported, so the caller can keep its checkpoint from
    /// moving past the record.
    pub async fn write_fresh(
        &mut self,
        records: &[Record],
        sink: &mut dyn RecordSink,
        seen_ids: &mut BTreeSet<String>,
    ) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        for record in records {
            match sink.write(record).await {
                Ok(()) => {
                    seen_ids.insert(record.id().to_string());
                    outcome.written += 1;
                }
                Err(error) => {
                    warn!(id = record.id(), error = %error, "failed to write record");
                    self.write_failures += 1;
                    if outcome
                        .earliest_failure
                        .as_ref()
                        .is_none_or(|earliest| record.cursor() < earliest)
                    {
                        outcome.earliest_failure = Some(record.cursor().clone());
                    }
                }
            }
        }
        self.written += outcome.written;
        outcome
    }

    /// Returns how many delivered records were dropped as duplicates.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Returns how many records were written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Returns how many record writes failed.
    #[must_use]
    pub fn write_failures(&self) -> usize {
        self.write_failures
    }
}
