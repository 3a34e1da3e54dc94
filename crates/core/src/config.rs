use crate::error::ConfigError;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub elasticsearch: ElasticsearchSettings,
    pub processing: ProcessingSettings,
    pub search: SearchSettings,
    pub performance: PerformanceSettings,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub bucket: String,
    pub prefix: String,
    /// Base URL of the GCS JSON API.
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Directory used as the bucket when `backend = "local"`.
    pub root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Gcs,
            bucket: String::new(),
            prefix: String::new(),
            endpoint: "https://storage.googleapis.com".to_string(),
            access_token: None,
            root: "./documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElasticsearchSettings {
    pub url: String,
    pub index_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index_name: "documents".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub max_file_size_bytes: u64,
    pub supported_formats: Vec<String>,
    pub extraction_timeout_secs: u64,
    pub ocr: OcrSettings,
    pub pdf: PdfSettings,
    pub csv: CsvSettings,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 8 * 1024 * 1024,
            supported_formats: ["txt", "csv", "pdf", "png"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            extraction_timeout_secs: 60,
            ocr: OcrSettings::default(),
            pdf: PdfSettings::default(),
            csv: CsvSettings::default(),
        }
    }
}

impl ProcessingSettings {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    Tesseract,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub engine: OcrEngineKind,
    pub language: String,
    pub dpi: u32,
    /// Tesseract executable name or path.
    pub binary: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::Tesseract,
            language: "eng".to_string(),
            dpi: 300,
            binary: "tesseract".to_string(),
            endpoint: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PdfSettings {
    pub max_pages: usize,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self { max_pages: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsvSettings {
    pub max_rows: usize,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self { max_rows: 10_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Clamp over-limit requests to `max_limit` instead of rejecting them.
    pub clamp_limit: bool,
    pub default_min_score: f64,
    pub highlight_fragments: usize,
    pub highlight_fragment_size: usize,
    pub max_analyzed_offset: usize,
    pub max_query_length: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            clamp_limit: true,
            default_min_score: 0.1,
            highlight_fragments: 3,
            highlight_fragment_size: 150,
            max_analyzed_offset: 1_000_000,
            max_query_length: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub max_concurrent_extractions: usize,
    pub batch_size: usize,
    pub bulk_retry_count: u32,
    pub bulk_backoff_ms: u64,
    pub refresh_interval: String,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 10,
            batch_size: 50,
            bulk_retry_count: 3,
            bulk_backoff_ms: 500,
            refresh_interval: "5s".to_string(),
        }
    }
}

impl Settings {
    /// Reads a TOML file, expanding `${VAR}` references in string values from
    /// the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut document: toml::Value = toml::from_str(raw)?;
        let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;
        expand_env_vars(&mut document, &pattern);

        let settings = Settings::deserialize(document)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let perf = &self.performance;
        if perf.batch_size == 0 {
            return Err(ConfigError::Invalid("performance.batch_size must be > 0".into()));
        }
        if perf.max_concurrent_extractions == 0 {
            return Err(ConfigError::Invalid(
                "performance.max_concurrent_extractions must be > 0".into(),
            ));
        }

        let processing = &self.processing;
        if processing.extraction_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "processing.extraction_timeout_secs must be > 0".into(),
            ));
        }
        if processing.pdf.max_pages == 0 {
            return Err(ConfigError::Invalid("processing.pdf.max_pages must be > 0".into()));
        }
        if processing.csv.max_rows == 0 {
            return Err(ConfigError::Invalid("processing.csv.max_rows must be > 0".into()));
        }

        let search = &self.search;
        if search.max_limit == 0 || search.default_limit == 0 {
            return Err(ConfigError::Invalid("search limits must be > 0".into()));
        }
        if search.default_limit > search.max_limit {
            return Err(ConfigError::Invalid(format!(
                "search.default_limit {} exceeds search.max_limit {}",
                search.default_limit, search.max_limit
            )));
        }
        if search.highlight_fragment_size == 0 {
            return Err(ConfigError::Invalid(
                "search.highlight_fragment_size must be > 0".into(),
            ));
        }
        if !search.default_min_score.is_finite() || search.default_min_score < 0.0 {
            return Err(ConfigError::Invalid(
                "search.default_min_score must be a non-negative number".into(),
            ));
        }
        if self.processing.supported_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "processing.supported_formats is empty".into(),
            ));
        }
        if self.processing.ocr.engine == OcrEngineKind::Http && self.processing.ocr.endpoint.is_none()
        {
            return Err(ConfigError::Invalid(
                "processing.ocr.endpoint is required for the http engine".into(),
            ));
        }

        Ok(())
    }
}

/// Expands references inside parsed string values only. Unset variables
/// expand to the empty string.
fn expand_env_vars(value: &mut toml::Value, pattern: &Regex) {
    match value {
        toml::Value::String(text) => {
            let expanded = pattern
                .replace_all(text, |captures: &Captures| {
                    std::env::var(&captures[1]).unwrap_or_default()
                })
                .into_owned();
            *text = expanded;
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_env_vars(item, pattern);
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_env_vars(item, pattern);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::from_toml_str("").expect("defaults should validate");
        assert_eq!(settings.performance.batch_size, 50);
        assert_eq!(settings.search.max_limit, 100);
        assert_eq!(settings.processing.max_file_size_bytes, 8 * 1024 * 1024);
        assert_eq!(settings.processing.supported_formats.len(), 4);
        assert_eq!(settings.storage.backend, StorageBackend::Gcs);
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [storage]
            backend = "local"
            root = "/srv/docs"

            [processing.csv]
            max_rows = 25

            [search]
            max_limit = 20
            clamp_limit = false
        "#;
        let settings = Settings::from_toml_str(raw).expect("config should parse");
        assert_eq!(settings.storage.backend, StorageBackend::Local);
        assert_eq!(settings.storage.root, "/srv/docs");
        assert_eq!(settings.processing.csv.max_rows, 25);
        assert_eq!(settings.processing.pdf.max_pages, 100);
        assert_eq!(settings.search.max_limit, 20);
        assert!(!settings.search.clamp_limit);
    }

    #[test]
    fn env_references_are_expanded() {
        std::env::set_var("DOC_SEARCH_TEST_BUCKET", "contracts-bucket");
        let raw = "[storage]\nbucket = \"${DOC_SEARCH_TEST_BUCKET}\"\n";
        let settings = Settings::from_toml_str(raw).expect("config should parse");
        assert_eq!(settings.storage.bucket, "contracts-bucket");
    }

    #[test]
    fn expanded_values_are_not_parsed_as_toml() {
        std::env::set_var(
            "DOC_SEARCH_TEST_TOKEN",
            "abc\"\n[performance]\nbatch_size = 0\n#",
        );
        let raw = "[storage]\naccess_token = \"${DOC_SEARCH_TEST_TOKEN}\"\n";
        let settings = Settings::from_toml_str(raw).expect("config should parse");
        assert_eq!(
            settings.storage.access_token.as_deref(),
            Some("abc\"\n[performance]\nbatch_size = 0\n#")
        );
        assert_eq!(settings.performance.batch_size, 50);
    }

    #[test]
    fn zero_caps_and_timeouts_are_rejected() {
        for raw in [
            "[processing]\nextraction_timeout_secs = 0\n",
            "[processing.pdf]\nmax_pages = 0\n",
            "[processing.csv]\nmax_rows = 0\n",
            "[search]\nhighlight_fragment_size = 0\n",
        ] {
            assert!(
                matches!(Settings::from_toml_str(raw), Err(ConfigError::Invalid(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn default_limit_above_max_is_rejected() {
        let raw = "[search]\ndefault_limit = 50\nmax_limit = 10\n";
        assert!(matches!(
            Settings::from_toml_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn http_ocr_requires_endpoint() {
        let raw = "[processing.ocr]\nengine = \"http\"\n";
        assert!(Settings::from_toml_str(raw).is_err());
    }
}
