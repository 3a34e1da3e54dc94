use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Txt,
    Csv,
    Pdf,
    Png,
}

impl FileType {
    pub const ALL: [FileType; 4] = [FileType::Txt, FileType::Csv, FileType::Pdf, FileType::Png];

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        Self::ALL
            .into_iter()
            .find(|file_type| file_type.as_str().eq_ignore_ascii_case(ext))
    }

    /// Extension of the last path segment, if it names a known type.
    pub fn from_locator(locator: &str) -> Option<Self> {
        let name = locator.rsplit('/').next().unwrap_or(locator);
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Txt => "txt",
            FileType::Csv => "csv",
            FileType::Pdf => "pdf",
            FileType::Png => "png",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_extension(value.trim()).ok_or_else(|| format!("unknown file type: {value}"))
    }
}

/// One object as reported by the store listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub locator: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Snapshot of an indexable object taken at enumeration time.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub locator: String,
    pub file_type: FileType,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

impl SourceDocument {
    pub fn file_name(&self) -> &str {
        self.locator.rsplit('/').next().unwrap_or(&self.locator)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Complete,
    /// Usable but lossy: fallback decoding, empty output, truncated input.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text: String,
    pub metadata: Metadata,
    pub status: ExtractionStatus,
}

impl ExtractionResult {
    pub fn complete(text: String, metadata: Metadata) -> Self {
        Self {
            text,
            metadata,
            status: ExtractionStatus::Complete,
        }
    }

    pub fn degraded(text: String, metadata: Metadata) -> Self {
        Self {
            text,
            metadata,
            status: ExtractionStatus::Degraded,
        }
    }
}

/// The unit persisted to the search engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub content: String,
    pub file_type: FileType,
    pub file_name: String,
    pub metadata: Metadata,
    pub source_locator: String,
    pub file_size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn build(
        source: &SourceDocument,
        bytes: &[u8],
        extraction: ExtractionResult,
        indexed_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = extraction.metadata;
        metadata.insert(
            "extraction_status".to_string(),
            serde_json::to_value(extraction.status).unwrap_or(Value::Null),
        );

        Self {
            id: document_id(&source.locator),
            content: extraction.text,
            file_type: source.file_type,
            file_name: source.file_name().to_string(),
            metadata,
            source_locator: source.locator.clone(),
            file_size: bytes.len() as u64,
            modified_at: source.modified_at,
            content_hash: digest_bytes(bytes),
            indexed_at,
        }
    }
}

/// Stable record id: re-indexing the same locator overwrites instead of duplicating.
pub fn document_id(locator: &str) -> String {
    digest_bytes(locator.as_bytes())
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Search parameters as received from a caller, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub text: String,
    pub limit: Option<usize>,
    pub file_type: Option<String>,
    pub min_score: Option<f64>,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// A validated query: every field holds its effective value.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub file_type: Option<FileType>,
    pub limit: usize,
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub highlights: Vec<String>,
    pub metadata: Metadata,
    pub source_locator: String,
    pub file_name: String,
    pub file_type: Option<FileType>,
    pub indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct RawSearchResponse {
    pub total_hits: u64,
    pub hits: Vec<SearchHit>,
}

/// Per-request acknowledgement of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub indexed: usize,
    /// `(record id, reason)` for every record the engine rejected.
    pub rejected: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub total_documents: u64,
    pub documents_by_type: Vec<(String, u64)>,
    pub total_size_bytes: u64,
    pub last_indexed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub search_engine: bool,
    pub storage: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.search_engine && self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_parses_case_insensitively() {
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension(".csv"), Some(FileType::Csv));
        assert_eq!(FileType::from_extension("docx"), None);
        assert_eq!("png".parse::<FileType>(), Ok(FileType::Png));
        assert!("exe".parse::<FileType>().is_err());
    }

    #[test]
    fn file_type_from_locator_uses_last_segment() {
        assert_eq!(FileType::from_locator("reports/2024/q1.TXT"), Some(FileType::Txt));
        assert_eq!(FileType::from_locator("archive.d/README"), None);
        assert_eq!(FileType::from_locator("noext"), None);
    }

    #[test]
    fn document_id_is_a_function_of_locator() {
        let first = document_id("contracts/lease.pdf");
        let second = document_id("contracts/lease.pdf");
        let other = document_id("contracts/lease-v2.pdf");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn record_id_ignores_content_changes() {
        let source = SourceDocument {
            locator: "notes/a.txt".to_string(),
            file_type: FileType::Txt,
            size: 3,
            modified_at: None,
        };
        let now = Utc::now();
        let first = IndexRecord::build(
            &source,
            b"abc",
            ExtractionResult::complete("abc".into(), Metadata::new()),
            now,
        );
        let second = IndexRecord::build(
            &source,
            b"xyz",
            ExtractionResult::complete("xyz".into(), Metadata::new()),
            now,
        );
        assert_eq!(first.id, second.id);
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(first.file_name, "a.txt");
        assert_eq!(
            first.metadata.get("extraction_status"),
            Some(&Value::String("complete".into()))
        );
    }
}
