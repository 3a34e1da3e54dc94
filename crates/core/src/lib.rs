pub mod config;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod projector;
pub mod query;
pub mod run;
pub mod source;
pub mod stores;
pub mod traits;

pub use config::{Settings, StorageBackend};
pub use error::{ConfigError, IndexingError, IngestError, SearchError, StorageError};
pub use extractor::{FormatExtractor, ImageExtractor, OcrEngine, PdfExtractor, TabularExtractor};
pub use ingest::IndexingCoordinator;
pub use models::{
    document_id, ExtractionResult, ExtractionStatus, FileType, HealthReport, IndexRecord,
    IndexStats, SearchHit, SearchQuery, SearchRequest, SourceDocument,
};
pub use orchestrator::{SearchCoordinator, StatsReport};
pub use projector::{DetailedHit, DetailedResponse};
pub use run::{RunKind, RunOutcome, RunSummary, RunTracker};
pub use source::{SourceEnumerator, SourceFilter, SourceListing};
pub use stores::{ElasticsearchStore, GcsStore, LocalStore};
pub use traits::{ObjectStore, SearchBackend};
