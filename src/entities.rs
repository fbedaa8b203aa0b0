//! Per-entity batch harvesting.
//!
//! Some endpoints are not paged by time but queried once per entity (for
//! example the best scores of each user id). [`EntityHarvester`] works through
//! a list of entity ids in rounds of the batch size, writes the returned
//! records through the same deduplication as the paginator, requeues
//! transient failures, and checkpoints the completed ids after every round.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use crate::batch::{BatchFetcher, RequeueDecision, RequeuePolicy, classify_error};
use crate::checkpoint::{Checkpoint, CursorStore};
use crate::dedup::Deduplicator;
use crate::error::HarvestError;
use crate::fetch::ItemSource;
use crate::record::{Record, RecordSchema};
use crate::sink::RecordSink;

/// Default identifier field of entity records.
pub const DEFAULT_ENTITY_ID_FIELD: &str = "score_id";

/// Default timestamp field of entity records.
pub const DEFAULT_ENTITY_CURSOR_FIELD: &str = "date";

/// Settings of an entity run.
#[derive(Debug, Clone)]
pub struct EntityOptions {
    /// Which record fields hold the id and timestamp.
    pub schema: RecordSchema,
    /// How often a failing entity is attempted.
    pub requeue: RequeuePolicy,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            schema: RecordSchema::new(DEFAULT_ENTITY_ID_FIELD, DEFAULT_ENTITY_CURSOR_FIELD),
            requeue: RequeuePolicy::default(),
        }
    }
}

/// Result of an entity run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySummary {
    /// Rounds fetched.
    pub rounds: usize,
    /// Entities completed in this run.
    pub completed: usize,
    /// Entities skipped because an earlier run completed them.
    pub already_completed: usize,
    /// Requeue decisions made.
    pub requeued: usize,
    /// Entities given up on, in the order they were dropped.
    pub dropped: Vec<String>,
    /// Records written.
    pub written: usize,
    /// Delivered records dropped as already written.
    pub duplicates: usize,
    /// Records whose write failed.
    pub write_failures: usize,
    /// The run ended early because the stop flag was set.
    pub interrupted: bool,
}

/// Harvests the records of a list of entities.
pub struct EntityHarvester {
    source: Arc<dyn ItemSource>,
    store: Arc<dyn CursorStore>,
    fetcher: BatchFetcher,
    options: EntityOptions,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for EntityHarvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHarvester")
            .field("fetcher", &self.fetcher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl EntityHarvester {
    /// Creates a harvester fetching through `fetcher` and checkpointing to `store`.
    #[must_use]
    pub fn new(
        source: Arc<dyn ItemSource>,
        store: Arc<dyn CursorStore>,
        fetcher: BatchFetcher,
        options: EntityOptions,
    ) -> Self {
        Self {
            source,
            store,
            fetcher,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `stop` as the cancellation flag, checked between rounds.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Returns the batch fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &BatchFetcher {
        &self.fetcher
    }

    /// Fetches every entity in `entity_ids` not completed by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns a [`HarvestError`] when the checkpoint cannot be loaded or
    /// saved or the sink cannot flush. Failures of individual entities are
    /// requeued or dropped, never returned.
    #[instrument(skip(self, entity_ids, sink), fields(entities = entity_ids.len()))]
    pub async fn run(
        &self,
        entity_ids: Vec<String>,
        sink: &mut dyn RecordSink,
    ) -> Result<EntitySummary, HarvestError> {
        let schema = &self.options.schema;
        let mut summary = EntitySummary::default();

        let mut checkpoint = self
            .store
            .load()
            .await?
            .unwrap_or_else(|| Checkpoint::new(None));
        checkpoint
            .seen_ids
            .extend(sink.written_ids(&schema.id_field).await?);

        let mut listed = BTreeSet::new();
        let mut work: VecDeque<(String, u32)> = VecDeque::new();
        for id in entity_ids {
            if !listed.insert(id.clone()) {
                continue;
            }
            if checkpoint.completed_entities.contains(&id) {
                summary.already_completed += 1;
            } else {
                work.push_back((id, 1));
            }
        }
        info!(
            pending = work.len(),
            already_completed = summary.already_completed,
            "entity work list ready"
        );

        let mut dedup = Deduplicator::new();

        while !work.is_empty() {
            if self.stop.load(Ordering::SeqCst) {
                info!(remaining = work.len(), "stop requested; ending after last checkpoint");
                summary.interrupted = true;
                break;
            }

            let take = work.len().min(self.fetcher.batch_size());
            let round: Vec<(String, u32)> = work.drain(..take).collect();
            let keys: Vec<String> = round.iter().map(|(id, _)| id.clone()).collect();
            let round: HashMap<String, u32> = round.into_iter().collect();

            let source = Arc::clone(&self.source);
            let outcome = self
                .fetcher
                .run_round(keys, move |id| {
                    let source = Arc::clone(&source);
                    async move { source.fetch_item(&id).await }
                })
                .await?;
            summary.rounds += 1;

            for (id, raw) in outcome.succeeded {
                let attempt = round.get(&id).copied().unwrap_or(1);
                let records = match raw
                    .into_iter()
                    .map(|value| Record::from_value(value, schema))
                    .collect::<Result<Vec<_>, _>>()
                {
                    Ok(records) => records,
                    Err(error) => {
                        warn!(entity = %id, error = %error, "malformed entity records; dropping");
                        summary.dropped.push(id);
                        continue;
                    }
                };

                let fresh = dedup.filter(records, &checkpoint.seen_ids);
                let written = dedup
                    .write_fresh(&fresh, sink, &mut checkpoint.seen_ids)
                    .await;

                if written.earliest_failure.is_none() {
                    checkpoint.completed_entities.insert(id);
                    summary.completed += 1;
                } else if attempt < self.options.requeue.max_attempts() {
                    summary.requeued += 1;
                    work.push_back((id, attempt + 1));
                } else {
                    warn!(entity = %id, "records could not be written; dropping");
                    summary.dropped.push(id);
                }
            }

            for failure in outcome.failed {
                let attempt = round.get(&failure.key).copied().unwrap_or(1);
                match self
                    .options
                    .requeue
                    .should_requeue(classify_error(&failure.error), attempt)
                {
                    RequeueDecision::Requeue { attempt } => {
                        summary.requeued += 1;
                        work.push_back((failure.key, attempt));
                    }
                    RequeueDecision::Drop { reason } => {
                        warn!(entity = %failure.key, error = %failure.error, reason, "dropping entity");
                        summary.dropped.push(failure.key);
                    }
                }
            }

            sink.flush().await?;
            self.store.save(&checkpoint).await?;
            info!(
                round = summary.rounds,
                completed = summary.completed,
                queued = work.len(),
                "round checkpointed"
            );
        }

        summary.written = dedup.written();
        summary.duplicates = dedup.duplicates();
        summary.write_failures = dedup.write_failures();
        Ok(summary)
    }
}
