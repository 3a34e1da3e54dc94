use crate::config::{SearchSettings, Settings};
use crate::error::{IndexingError, IngestError, SearchError};
use crate::ingest::IndexingCoordinator;
use crate::models::{document_id, HealthReport, IndexStats, SearchHit, SearchRequest};
use crate::projector::{project_detailed, project_paths, DetailedResponse};
use crate::query::{build_request, finalize_hits, validate};
use crate::run::RunSummary;
use crate::traits::{ObjectStore, SearchBackend};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsReport {
    /// The active run, or the last one to finish.
    pub run: Option<RunSummary>,
    pub index: IndexStats,
}

/// Entry point for callers: searching, indexing runs and index maintenance.
pub struct SearchCoordinator<S: ?Sized, B: ?Sized> {
    indexer: IndexingCoordinator<S, B>,
    search: SearchSettings,
}

impl<S, B> SearchCoordinator<S, B>
where
    S: ObjectStore + ?Sized + 'static,
    B: SearchBackend + ?Sized + 'static,
{
    pub fn new(indexer: IndexingCoordinator<S, B>, search: SearchSettings) -> Self {
        Self { indexer, search }
    }

    pub fn from_settings(store: Arc<S>, backend: Arc<B>, settings: &Settings) -> Result<Self, IngestError> {
        let indexer = IndexingCoordinator::from_settings(store, backend, settings)?;
        Ok(Self::new(indexer, settings.search.clone()))
    }

    pub fn indexer(&self) -> &IndexingCoordinator<S, B> {
        &self.indexer
    }

    /// Locators of matching documents, best first.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<String>, SearchError> {
        let (_, _, hits) = self.run_query(request).await?;
        Ok(project_paths(&hits))
    }

    pub async fn search_detailed(&self, request: &SearchRequest) -> Result<DetailedResponse, SearchError> {
        let started = Instant::now();
        let (text, total_hits, hits) = self.run_query(request).await?;
        let store = self.indexer.store();
        Ok(project_detailed(
            &text,
            total_hits,
            &hits,
            |locator| store.public_url(locator),
            started.elapsed(),
        ))
    }

    async fn run_query(&self, request: &SearchRequest) -> Result<(String, u64, Vec<SearchHit>), SearchError> {
        let query = validate(request, &self.search)?;
        let body = build_request(&query, &self.search);
        let raw = self.indexer.backend().search(&body).await?;
        let returned = raw.hits.len();
        let hits = finalize_hits(raw.hits, &query, &self.search);
        debug!(
            query = %query.text,
            total_hits = raw.total_hits,
            returned,
            kept = hits.len(),
            "search finished"
        );
        Ok((query.text, raw.total_hits, hits))
    }

    pub async fn reindex(&self) -> Result<RunSummary, IndexingError> {
        self.indexer.reindex().await
    }

    pub async fn index_incremental(&self, locators: Option<Vec<String>>) -> Result<RunSummary, IndexingError> {
        self.indexer.index_incremental(locators).await
    }

    pub async fn stats(&self) -> Result<StatsReport, SearchError> {
        let index = self.indexer.backend().index_stats().await?;
        Ok(StatsReport {
            run: self.indexer.tracker().snapshot(),
            index,
        })
    }

    /// Deletes the record derived from `locator`. Returns `false` if none existed.
    pub async fn remove_document(&self, locator: &str) -> Result<bool, SearchError> {
        let removed = self.indexer.backend().delete_by_id(&document_id(locator)).await?;
        info!(locator, removed, "document removal requested");
        Ok(removed)
    }

    pub async fn health(&self) -> HealthReport {
        let (search_engine, storage) = tokio::join!(
            self.indexer.backend().health_check(),
            self.indexer.store().health_check()
        );
        HealthReport {
            search_engine,
            storage,
            checked_at: Utc::now(),
        }
    }
}
