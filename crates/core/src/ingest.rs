use crate::config::{PerformanceSettings, Settings};
use crate::error::{IndexingError, IngestError, SearchError};
use crate::extractor::FormatExtractor;
use crate::models::{BulkOutcome, IndexRecord, SourceDocument};
use crate::run::{RunCounters, RunGuard, RunKind, RunSummary, RunTracker};
use crate::source::{SourceEnumerator, SourceFilter, SourceListing};
use crate::traits::{ObjectStore, SearchBackend};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Drives enumeration, concurrent extraction and bulk loading. Owns the run
/// record; only one run (full or incremental) is active at a time.
pub struct IndexingCoordinator<S: ?Sized, B: ?Sized> {
    store: Arc<S>,
    backend: Arc<B>,
    extractor: Arc<FormatExtractor>,
    enumerator: SourceEnumerator,
    prefix: String,
    max_file_size_bytes: u64,
    performance: PerformanceSettings,
    tracker: RunTracker,
}

impl<S, B> IndexingCoordinator<S, B>
where
    S: ObjectStore + ?Sized + 'static,
    B: SearchBackend + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        backend: Arc<B>,
        extractor: FormatExtractor,
        filter: SourceFilter,
        performance: PerformanceSettings,
    ) -> Self {
        Self {
            store,
            backend,
            extractor: Arc::new(extractor),
            max_file_size_bytes: filter.max_file_size_bytes(),
            enumerator: SourceEnumerator::new(filter),
            prefix: String::new(),
            performance,
            tracker: RunTracker::new(),
        }
    }

    pub fn from_settings(store: Arc<S>, backend: Arc<B>, settings: &Settings) -> Result<Self, IngestError> {
        let extractor = FormatExtractor::from_settings(&settings.processing)?;
        Ok(Self::new(
            store,
            backend,
            extractor,
            SourceFilter::from_settings(&settings.processing),
            settings.performance.clone(),
        )
        .with_prefix(settings.storage.prefix.clone()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Rebuilds the index from the whole store: clear, then load every source.
    pub async fn reindex(&self) -> Result<RunSummary, IndexingError> {
        let guard = self.tracker.try_start(RunKind::Full)?;
        info!(run_id = guard.run_id(), "full reindex started");

        let listing = match self.enumerator.enumerate(self.store.as_ref(), &self.prefix).await {
            Ok(listing) => listing,
            Err(source) => return Err(abort(guard, RunCounters::default(), IndexingError::Enumeration(source))),
        };
        let counters = RunCounters {
            discovered: listing.len(),
            ..RunCounters::default()
        };
        guard.publish(counters);

        if let Err(source) = self.backend.ensure_index().await {
            return Err(abort(guard, counters, IndexingError::Setup(source)));
        }
        if let Err(source) = self.backend.clear().await {
            return Err(abort(guard, counters, IndexingError::Clear(source)));
        }

        Ok(self.load(guard, &listing, counters).await)
    }

    /// Upserts sources without clearing. `None` takes everything the store lists;
    /// explicit locators are checked for existence first.
    pub async fn index_incremental(
        &self,
        locators: Option<Vec<String>>,
    ) -> Result<RunSummary, IndexingError> {
        let guard = self.tracker.try_start(RunKind::Incremental)?;
        info!(run_id = guard.run_id(), "incremental indexing started");

        let listed = match &locators {
            Some(locators) => self.enumerator.resolve(self.store.as_ref(), locators).await,
            None => self.enumerator.enumerate(self.store.as_ref(), &self.prefix).await,
        };
        let listing = match listed {
            Ok(listing) => listing,
            Err(source) => return Err(abort(guard, RunCounters::default(), IndexingError::Enumeration(source))),
        };
        let counters = RunCounters {
            discovered: listing.len(),
            ..RunCounters::default()
        };
        guard.publish(counters);

        if let Err(source) = self.backend.ensure_index().await {
            return Err(abort(guard, counters, IndexingError::Setup(source)));
        }

        Ok(self.load(guard, &listing, counters).await)
    }

    async fn load(&self, guard: RunGuard, listing: &SourceListing, mut counters: RunCounters) -> RunSummary {
        let batch_size = self.performance.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.performance.max_concurrent_extractions.max(1)));
        let documents: Vec<SourceDocument> = listing.iter().cloned().collect();
        let mut pending: Vec<IndexRecord> = Vec::with_capacity(batch_size);

        for window in documents.chunks(batch_size) {
            for (document, outcome) in window.iter().zip(self.extract_window(window, &semaphore).await) {
                match outcome {
                    Ok(record) => {
                        counters.succeeded += 1;
                        pending.push(record);
                    }
                    Err(reason) => {
                        counters.failed += 1;
                        warn!(locator = %document.locator, reason = %reason, "document not indexed");
                    }
                }

                if pending.len() >= batch_size {
                    self.flush(&mut pending, &mut counters).await;
                }
            }
            guard.publish(counters);
        }

        if !pending.is_empty() {
            self.flush(&mut pending, &mut counters).await;
        }
        if let Err(reason) = self.backend.refresh().await {
            warn!(reason = %reason, "index refresh after load failed");
        }

        let summary = guard.finish(counters);
        info!(
            run_id = %summary.run_id,
            discovered = summary.discovered,
            succeeded = summary.succeeded,
            failed = summary.failed,
            indexed = summary.indexed,
            "indexing run finished"
        );
        summary
    }

    /// Reads and extracts one window concurrently; results come back in window order.
    async fn extract_window(
        &self,
        window: &[SourceDocument],
        semaphore: &Arc<Semaphore>,
    ) -> Vec<Result<IndexRecord, IngestError>> {
        let mut tasks = JoinSet::new();
        for (position, document) in window.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let extractor = Arc::clone(&self.extractor);
            let semaphore = Arc::clone(semaphore);
            let document = document.clone();
            let limit = self.max_file_size_bytes;

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(permit) => index_one(store.as_ref(), &extractor, &document, limit, permit).await,
                    Err(closed) => Err(IngestError::Task(closed.to_string())),
                };
                (position, outcome)
            });
        }

        let mut slots: Vec<Option<Result<IndexRecord, IngestError>>> =
            window.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => slots[position] = Some(outcome),
                Err(join_error) => warn!(reason = %join_error, "extraction task did not complete"),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(IngestError::Task("extraction task aborted".to_string()))))
            .collect()
    }

    async fn flush(&self, pending: &mut Vec<IndexRecord>, counters: &mut RunCounters) {
        let batch = std::mem::take(pending);
        match self.write_with_retry(&batch).await {
            Ok(outcome) => {
                for (id, reason) in &outcome.rejected {
                    let locator = batch
                        .iter()
                        .find(|record| &record.id == id)
                        .map(|record| record.source_locator.as_str())
                        .unwrap_or(id.as_str());
                    warn!(locator, reason = %reason, "record rejected by search engine");
                }
                counters.indexed += outcome.indexed;
                counters.failed += batch.len().saturating_sub(outcome.indexed);
            }
            Err(reason) => {
                error!(records = batch.len(), reason = %reason, "bulk write failed after retries");
                for record in &batch {
                    warn!(locator = %record.source_locator, "record not written");
                }
                counters.failed += batch.len();
            }
        }
    }

    async fn write_with_retry(&self, batch: &[IndexRecord]) -> Result<BulkOutcome, SearchError> {
        let retries = self.performance.bulk_retry_count;
        let mut attempt = 0u32;
        loop {
            match self.backend.bulk_index(batch).await {
                Ok(outcome) => return Ok(outcome),
                Err(reason) if attempt < retries => {
                    let delay = backoff_delay(self.performance.bulk_backoff_ms, attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "bulk write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(reason) => return Err(reason),
            }
        }
    }
}

fn abort(guard: RunGuard, counters: RunCounters, failure: IndexingError) -> IndexingError {
    error!(run_id = guard.run_id(), reason = %failure, "indexing run aborted");
    guard.fail(counters, failure.to_string());
    failure
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

async fn index_one<S>(
    store: &S,
    extractor: &FormatExtractor,
    document: &SourceDocument,
    max_file_size_bytes: u64,
    slot: OwnedSemaphorePermit,
) -> Result<IndexRecord, IngestError>
where
    S: ObjectStore + ?Sized,
{
    let bytes: Arc<[u8]> = store.read(&document.locator).await?.into();
    let size = bytes.len() as u64;
    if size > max_file_size_bytes {
        return Err(IngestError::TooLarge {
            size,
            limit: max_file_size_bytes,
        });
    }

    let extraction = extractor
        .extract_in_slot(document.file_type, Arc::clone(&bytes), Some(slot))
        .await?;
    Ok(IndexRecord::build(document, &bytes, extraction, Utc::now()))
}
