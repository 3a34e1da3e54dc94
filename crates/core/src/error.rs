use thiserror::Error;

/// Failure to turn one document into an index record. Never aborts a run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage read failed: {0}")]
    Storage(#[from] StorageError),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("csv parse error: {0}")]
    Csv(String),

    #[error("image decode error: {0}")]
    Image(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extraction task aborted: {0}")]
    Task(String),
}

impl From<csv::Error> for IngestError {
    fn from(error: csv::Error) -> Self {
        IngestError::Csv(error.to_string())
    }
}

impl From<image::ImageError> for IngestError {
    fn from(error: image::ImageError) -> Self {
        IngestError::Image(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unreachable: {0}")]
    Unreachable(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("an indexing run is already active: {run_id}")]
    Conflict { run_id: String },

    #[error("source enumeration failed: {0}")]
    Enumeration(#[source] StorageError),

    #[error("clearing the index failed, no records were written: {0}")]
    Clear(#[source] SearchError),

    #[error("index setup failed: {0}")]
    Setup(#[source] SearchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
