use crate::config::ElasticsearchSettings;
use crate::models::{BulkOutcome, IndexRecord, IndexStats, RawSearchResponse, SearchHit};
use crate::traits::SearchBackend;
use crate::SearchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

const BACKEND: &str = "elasticsearch";

pub struct ElasticsearchStore {
    client: Client,
    endpoint: String,
    index_name: String,
    credentials: Option<(String, Option<String>)>,
    refresh_interval: String,
}

impl ElasticsearchStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            credentials: None,
            refresh_interval: "5s".to_string(),
        }
    }

    pub fn from_settings(
        settings: &ElasticsearchSettings,
        refresh_interval: &str,
    ) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.url.trim_end_matches('/').to_string(),
            index_name: settings.index_name.clone(),
            credentials: settings
                .username
                .clone()
                .filter(|user| !user.is_empty())
                .map(|user| (user, settings.password.clone())),
            refresh_interval: refresh_interval.to_string(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    fn index_body(&self) -> Value {
        json!({
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 0,
                "refresh_interval": self.refresh_interval,
                "analysis": {
                    "analyzer": {
                        "content_analyzer": {
                            "type": "custom",
                            "tokenizer": "standard",
                            "filter": ["lowercase", "stop", "snowball"]
                        }
                    }
                }
            },
            "mappings": {
                "properties": {
                    "content": {"type": "text", "analyzer": "content_analyzer"},
                    "file_name": {
                        "type": "keyword",
                        "fields": {"text": {"type": "text", "analyzer": "standard"}}
                    },
                    "file_type": {"type": "keyword"},
                    "source_locator": {"type": "keyword"},
                    "file_size": {"type": "long"},
                    "content_hash": {"type": "keyword"},
                    "modified_at": {"type": "date"},
                    "indexed_at": {"type": "date"},
                    "csv_columns": {"type": "keyword"},
                    "metadata": {"type": "object", "enabled": true}
                }
            }
        })
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {}", truncate_for_log(&body)),
    })
}

fn truncate_for_log(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

fn record_source(record: &IndexRecord) -> Value {
    json!({
        "content": record.content,
        "file_name": record.file_name,
        "file_type": record.file_type,
        "source_locator": record.source_locator,
        "file_size": record.file_size,
        "content_hash": record.content_hash,
        "modified_at": record.modified_at,
        "indexed_at": record.indexed_at,
        "csv_columns": record.metadata.get("csv_columns").cloned().unwrap_or(Value::Null),
        "metadata": record.metadata,
    })
}

pub fn bulk_payload(index_name: &str, records: &[IndexRecord]) -> Result<String, SearchError> {
    let mut lines = Vec::with_capacity(records.len() * 2);
    for record in records {
        lines.push(serde_json::to_string(&json!({
            "index": {"_index": index_name, "_id": record.id}
        }))?);
        lines.push(serde_json::to_string(&record_source(record))?);
    }
    Ok(lines.join("\n") + "\n")
}

/// Reads per-item results from a `_bulk` response body.
pub fn parse_bulk_response(response: &Value) -> BulkOutcome {
    let items = response
        .pointer("/items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut outcome = BulkOutcome::default();
    for item in items {
        let action = item.get("index").cloned().unwrap_or(Value::Null);
        let id = action
            .pointer("/_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = action.pointer("/status").and_then(Value::as_u64).unwrap_or(0);

        match action.get("error") {
            Some(error) if !error.is_null() => {
                let reason = error
                    .pointer("/reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                outcome.rejected.push((id, reason));
            }
            _ if (200..300).contains(&status) => outcome.indexed += 1,
            _ => outcome.rejected.push((id, format!("status {status}"))),
        }
    }
    outcome
}

pub fn parse_search_response(response: &Value) -> RawSearchResponse {
    let total_hits = response
        .pointer("/hits/total/value")
        .or_else(|| response.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| hits.iter().map(parse_hit).collect())
        .unwrap_or_default();

    RawSearchResponse { total_hits, hits }
}

fn parse_hit(raw: &Value) -> SearchHit {
    let source = raw.get("_source").cloned().unwrap_or(Value::Null);
    let text_field = |name: &str| {
        source
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let highlights = raw
        .pointer("/highlight/content")
        .and_then(Value::as_array)
        .map(|fragments| {
            fragments
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    SearchHit {
        id: raw
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: raw.get("_score").and_then(Value::as_f64).unwrap_or(0.0).max(0.0),
        highlights,
        metadata: source
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new),
        source_locator: text_field("source_locator"),
        file_name: text_field("file_name"),
        file_type: source
            .get("file_type")
            .and_then(Value::as_str)
            .and_then(|value| value.parse().ok()),
        indexed_at: source
            .get("indexed_at")
            .and_then(Value::as_str)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc)),
    }
}

fn parse_stats(count: &Value, aggregations: &Value) -> IndexStats {
    let documents_by_type = aggregations
        .pointer("/aggregations/file_types/buckets")
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|bucket| {
                    let key = bucket.get("key").and_then(Value::as_str)?;
                    let count = bucket.get("doc_count").and_then(Value::as_u64)?;
                    Some((key.to_string(), count))
                })
                .collect()
        })
        .unwrap_or_default();

    IndexStats {
        total_documents: count.get("count").and_then(Value::as_u64).unwrap_or(0),
        documents_by_type,
        total_size_bytes: aggregations
            .pointer("/aggregations/total_size/value")
            .and_then(Value::as_f64)
            .map(|value| value as u64)
            .unwrap_or(0),
        last_indexed: aggregations
            .pointer("/aggregations/last_indexed/value_as_string")
            .and_then(Value::as_str)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc)),
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchStore {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self.request(Method::HEAD, &self.index_name).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .request(Method::PUT, &self.index_name)
            .json(&self.index_body())
            .send()
            .await?;
        ensure_success(response).await?;
        info!(index = %self.index_name, "created search index");
        Ok(())
    }

    async fn bulk_index(&self, records: &[IndexRecord]) -> Result<BulkOutcome, SearchError> {
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let payload = bulk_payload(&self.index_name, records)?;
        let response = self
            .request(Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;

        let outcome = parse_bulk_response(&body);
        for (id, reason) in &outcome.rejected {
            warn!(document_id = %id, %reason, "search engine rejected record");
        }
        Ok(outcome)
    }

    async fn clear(&self) -> Result<(), SearchError> {
        let response = self
            .request(
                Method::POST,
                &format!(
                    "{}/_delete_by_query?conflicts=proceed&refresh=true",
                    self.index_name
                ),
            )
            .json(&json!({"query": {"match_all": {}}}))
            .send()
            .await?;
        let body: Value = ensure_success(response).await?.json().await?;
        let deleted = body.get("deleted").and_then(Value::as_u64).unwrap_or(0);
        info!(index = %self.index_name, deleted, "cleared search index");
        Ok(())
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        let response = self
            .request(Method::POST, &format!("{}/_refresh", self.index_name))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn search(&self, body: &Value) -> Result<RawSearchResponse, SearchError> {
        let response = self
            .request(Method::POST, &format!("{}/_search", self.index_name))
            .json(body)
            .send()
            .await?;
        let response_json: Value = ensure_success(response).await?.json().await?;
        Ok(parse_search_response(&response_json))
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, SearchError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("{}/_doc/{}?refresh=true", self.index_name, id),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }

    async fn index_stats(&self) -> Result<IndexStats, SearchError> {
        let response = self
            .request(Method::GET, &format!("{}/_count", self.index_name))
            .send()
            .await?;
        let count: Value = ensure_success(response).await?.json().await?;

        let response = self
            .request(Method::POST, &format!("{}/_search", self.index_name))
            .json(&json!({
                "size": 0,
                "aggs": {
                    "file_types": {"terms": {"field": "file_type"}},
                    "total_size": {"sum": {"field": "file_size"}},
                    "last_indexed": {"max": {"field": "indexed_at"}}
                }
            }))
            .send()
            .await?;
        let aggregations: Value = ensure_success(response).await?.json().await?;

        Ok(parse_stats(&count, &aggregations))
    }

    async fn health_check(&self) -> bool {
        let cluster = match self.request(Method::GET, "_cluster/health").send().await {
            Ok(response) if response.status().is_success() => response.json::<Value>().await.ok(),
            Ok(_) | Err(_) => None,
        };
        let status_ok = cluster
            .as_ref()
            .and_then(|health| health.get("status"))
            .and_then(Value::as_str)
            .is_some_and(|status| status == "green" || status == "yellow");

        if !status_ok {
            return false;
        }

        matches!(
            self.request(Method::HEAD, &self.index_name).send().await,
            Ok(response) if response.status() == StatusCode::OK
        )
    }
}
