use crate::models::{FileType, Metadata, SearchHit};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetailedHit {
    pub document_id: String,
    pub locator: String,
    pub url: String,
    pub file_name: String,
    pub file_type: Option<FileType>,
    pub score: f64,
    pub highlights: Vec<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetailedResponse {
    pub query: String,
    pub total_hits: u64,
    pub execution_time_ms: u64,
    pub results: Vec<DetailedHit>,
}

/// Locators in rank order.
pub fn project_paths(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().map(|hit| hit.source_locator.clone()).collect()
}

pub fn project_detailed<F>(
    query: &str,
    total_hits: u64,
    hits: &[SearchHit],
    resolve_url: F,
    elapsed: Duration,
) -> DetailedResponse
where
    F: Fn(&str) -> String,
{
    DetailedResponse {
        query: query.to_string(),
        total_hits,
        execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        results: hits
            .iter()
            .map(|hit| DetailedHit {
                document_id: hit.id.clone(),
                locator: hit.source_locator.clone(),
                url: resolve_url(&hit.source_locator),
                file_name: hit.file_name.clone(),
                file_type: hit.file_type,
                score: hit.score,
                highlights: hit.highlights.clone(),
                metadata: hit.metadata.clone(),
            })
            .collect(),
    }
}
