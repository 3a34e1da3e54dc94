use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use doc_search_core::{
    ElasticsearchStore, GcsStore, LocalStore, ObjectStore, SearchCoordinator, SearchRequest,
    Settings, StorageBackend,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, env = "DOC_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Elasticsearch base URL
    #[arg(long, env = "ELASTICSEARCH_URL")]
    elasticsearch_url: Option<String>,

    /// Elasticsearch index name
    #[arg(long, env = "ELASTICSEARCH_INDEX")]
    elasticsearch_index: Option<String>,

    /// Where source documents are read from
    #[arg(long, env = "DOC_SEARCH_STORAGE", value_enum)]
    storage: Option<StorageArg>,

    /// GCS bucket holding the documents
    #[arg(long, env = "GCS_BUCKET")]
    bucket: Option<String>,

    /// Directory used as the bucket with `--storage local`
    #[arg(long, env = "DOC_SEARCH_ROOT")]
    root: Option<String>,

    /// Only objects under this prefix are indexed
    #[arg(long, env = "DOC_SEARCH_PREFIX")]
    prefix: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StorageArg {
    Gcs,
    Local,
}

impl From<StorageArg> for StorageBackend {
    fn from(value: StorageArg) -> Self {
        match value {
            StorageArg::Gcs => StorageBackend::Gcs,
            StorageArg::Local => StorageBackend::Local,
        }
    }
}

#[derive(Args)]
struct QueryArgs {
    /// Search text
    query: String,
    /// Maximum number of results.
    #[arg(long)]
    limit: Option<usize>,
    /// Restrict results to one file type (txt, csv, pdf, png).
    #[arg(long)]
    file_type: Option<String>,
    /// Drop results scoring below this value.
    #[arg(long)]
    min_score: Option<f64>,
}

impl QueryArgs {
    fn into_request(self) -> SearchRequest {
        SearchRequest {
            text: self.query,
            limit: self.limit,
            file_type: self.file_type,
            min_score: self.min_score,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Clear the index and rebuild it from every stored document.
    Reindex,
    /// Index documents without clearing; everything, or only the given locators.
    Index {
        #[arg(long = "locator")]
        locators: Vec<String>,
    },
    /// Print the locators of matching documents, best first.
    Search(QueryArgs),
    /// Print matches with scores, highlights, metadata and URLs.
    SearchDetailed(QueryArgs),
    /// Show the current or last indexing run and index totals.
    Stats,
    /// Check both the search engine and the object store.
    Health,
    /// Remove one document from the index.
    Delete {
        locator: String,
    },
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(url) = &cli.elasticsearch_url {
        settings.elasticsearch.url = url.clone();
    }
    if let Some(index) = &cli.elasticsearch_index {
        settings.elasticsearch.index_name = index.clone();
    }
    if let Some(storage) = cli.storage {
        settings.storage.backend = storage.into();
    }
    if let Some(bucket) = &cli.bucket {
        settings.storage.bucket = bucket.clone();
    }
    if let Some(root) = &cli.root {
        settings.storage.root = root.clone();
    }
    if let Some(prefix) = &cli.prefix {
        settings.storage.prefix = prefix.clone();
    }

    settings.validate()?;
    Ok(settings)
}

fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match settings.storage.backend {
        StorageBackend::Gcs => {
            if settings.storage.bucket.trim().is_empty() {
                bail!("no GCS bucket configured; set storage.bucket or --bucket");
            }
            Ok(Arc::new(GcsStore::from_settings(&settings.storage)))
        }
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(&settings.storage.root))),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let backend = Arc::new(ElasticsearchStore::from_settings(
        &settings.elasticsearch,
        &settings.performance.refresh_interval,
    )?);
    let store = open_store(&settings)?;
    let coordinator = SearchCoordinator::from_settings(store, backend, &settings)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %settings.elasticsearch.index_name,
        "doc-search boot"
    );

    match cli.command {
        Command::Reindex => print_json(&coordinator.reindex().await?)?,
        Command::Index { locators } => {
            let locators = (!locators.is_empty()).then_some(locators);
            print_json(&coordinator.index_incremental(locators).await?)?;
        }
        Command::Search(args) => {
            for locator in coordinator.search(&args.into_request()).await? {
                println!("{locator}");
            }
        }
        Command::SearchDetailed(args) => {
            print_json(&coordinator.search_detailed(&args.into_request()).await?)?
        }
        Command::Stats => print_json(&coordinator.stats().await?)?,
        Command::Health => {
            let report = coordinator.health().await;
            print_json(&report)?;
            if !report.is_healthy() {
                bail!("one or more backends are unhealthy");
            }
        }
        Command::Delete { locator } => {
            let removed = coordinator.remove_document(&locator).await?;
            print_json(&serde_json::json!({ "locator": locator, "removed": removed }))?;
        }
    }

    Ok(())
}
