use crate::config::StorageSettings;
use crate::models::ObjectEntry;
use crate::traits::ObjectStore;
use crate::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use url::Url;

const BACKEND: &str = "gcs";
const PUBLIC_HOST: &str = "https://storage.googleapis.com/";

/// Google Cloud Storage over the JSON API.
pub struct GcsStore {
    client: Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    /// The API reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

impl ObjectResource {
    fn into_entry(self) -> ObjectEntry {
        ObjectEntry {
            size: self
                .size
                .as_deref()
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            modified_at: self
                .updated
                .as_deref()
                .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                .map(|value| value.with_timezone(&Utc)),
            locator: self.name,
        }
    }
}

impl GcsStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            access_token: access_token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        let token = settings
            .access_token
            .clone()
            .or_else(|| std::env::var("GCS_ACCESS_TOKEN").ok());
        Self::new(&settings.endpoint, &settings.bucket, token)
    }

    fn objects_url(&self) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Unreachable(format!("bad endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
        Ok(url)
    }

    fn object_url(&self, locator: &str) -> Result<Url, StorageError> {
        let mut url = self.objects_url()?;
        // Pushing the whole name as one segment percent-encodes its slashes.
        url.path_segments_mut()
            .map_err(|_| StorageError::Unreachable(format!("bad endpoint {}", self.endpoint)))?
            .push(locator);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ObjectList, StorageError> {
        let mut url = self.objects_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fields", "items(name,size,updated),nextPageToken");
            if !prefix.is_empty() {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|error| StorageError::Unreachable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("listing bucket {} returned {}", self.bucket, response.status()),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.fetch_page(prefix, page_token.as_deref()).await?;
            entries.extend(
                page.items
                    .into_iter()
                    .filter(|item| !item.name.ends_with('/'))
                    .map(ObjectResource::into_entry),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(entries)
    }

    async fn read(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let mut url = self.object_url(locator)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.authorized(self.client.get(url)).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(locator.to_string())),
            status => Err(StorageError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("reading {locator} returned {status}"),
            }),
        }
    }

    async fn exists(&self, locator: &str) -> Result<bool, StorageError> {
        let response = self
            .authorized(self.client.get(self.object_url(locator)?))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StorageError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("checking {locator} returned {status}"),
            }),
        }
    }

    fn public_url(&self, locator: &str) -> String {
        let Ok(mut url) = Url::parse(PUBLIC_HOST) else {
            return format!("{PUBLIC_HOST}{}/{locator}", self.bucket);
        };
        // Each name segment is encoded on its own so the slashes stay as path separators.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&self.bucket)
                .extend(locator.split('/'));
        }
        url.into()
    }

    async fn health_check(&self) -> bool {
        let Ok(mut url) = self.objects_url() else {
            return false;
        };
        url.query_pairs_mut().append_pair("maxResults", "1");
        matches!(
            self.authorized(self.client.get(url)).send().await,
            Ok(response) if response.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_encodes_nested_names() -> Result<(), Box<dyn std::error::Error>> {
        let store = GcsStore::new("https://storage.googleapis.com/", "bucket-1", None);
        let url = store.object_url("reports/2024/q1 summary.pdf")?;
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket-1/o/reports%2F2024%2Fq1%20summary.pdf"
        );
        Ok(())
    }

    #[test]
    fn listing_resources_convert_to_entries() -> Result<(), Box<dyn std::error::Error>> {
        let page: ObjectList = serde_json::from_str(
            r#"{
                "items": [
                    {"name": "a/b.txt", "size": "1024", "updated": "2024-03-01T12:00:00.000Z"},
                    {"name": "c.csv"}
                ],
                "nextPageToken": "tok"
            }"#,
        )?;
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));

        let entries: Vec<ObjectEntry> = page.items.into_iter().map(ObjectResource::into_entry).collect();
        assert_eq!(entries[0].locator, "a/b.txt");
        assert_eq!(entries[0].size, 1024);
        assert!(entries[0].modified_at.is_some());
        assert_eq!(entries[1].size, 0);
        Ok(())
    }

    #[test]
    fn public_url_encodes_each_name_segment() {
        let store = GcsStore::new("https://storage.googleapis.com", "docs", None);
        assert_eq!(
            store.public_url("minutes/board #4/q1 plan?.pdf"),
            "https://storage.googleapis.com/docs/minutes/board%20%234/q1%20plan%3F.pdf"
        );
    }

    #[test]
    fn public_url_points_at_bucket_object() {
        let store = GcsStore::new("https://storage.googleapis.com", "docs", None);
        assert_eq!(
            store.public_url("x/y.png"),
            "https://storage.googleapis.com/docs/x/y.png"
        );
    }
}
