use crate::config::ProcessingSettings;
use crate::error::StorageError;
use crate::models::{FileType, ObjectEntry, SourceDocument};
use crate::traits::ObjectStore;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Which listed objects are worth extracting.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    accepted: HashSet<FileType>,
    max_file_size_bytes: u64,
}

impl SourceFilter {
    pub fn new(accepted: impl IntoIterator<Item = FileType>, max_file_size_bytes: u64) -> Self {
        Self {
            accepted: accepted.into_iter().collect(),
            max_file_size_bytes,
        }
    }

    pub fn from_settings(settings: &ProcessingSettings) -> Self {
        let accepted = settings
            .supported_formats
            .iter()
            .filter_map(|format| match format.parse::<FileType>() {
                Ok(file_type) => Some(file_type),
                Err(error) => {
                    warn!(%error, "ignoring unsupported format in configuration");
                    None
                }
            });
        Self::new(accepted, settings.max_file_size_bytes)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    /// The accepted type for a locator, ignoring size.
    pub fn file_type_of(&self, locator: &str) -> Option<FileType> {
        FileType::from_locator(locator).filter(|file_type| self.accepted.contains(file_type))
    }

    pub fn admit(&self, entry: &ObjectEntry) -> Option<SourceDocument> {
        let Some(file_type) = self.file_type_of(&entry.locator) else {
            debug!(locator = %entry.locator, "skipping object with unsupported extension");
            return None;
        };
        if entry.size > self.max_file_size_bytes {
            debug!(
                locator = %entry.locator,
                size = entry.size,
                limit = self.max_file_size_bytes,
                "skipping object above size limit"
            );
            return None;
        }

        Some(SourceDocument {
            locator: entry.locator.clone(),
            file_type,
            size: entry.size,
            modified_at: entry.modified_at,
        })
    }
}

/// A point-in-time listing. Iterating it again yields the same documents.
#[derive(Debug, Clone, Default)]
pub struct SourceListing {
    documents: Vec<SourceDocument>,
}

impl SourceListing {
    pub fn iter(&self) -> impl Iterator<Item = &SourceDocument> + '_ {
        self.documents.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl FromIterator<SourceDocument> for SourceListing {
    fn from_iter<I: IntoIterator<Item = SourceDocument>>(iter: I) -> Self {
        Self {
            documents: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceEnumerator {
    filter: SourceFilter,
}

impl SourceEnumerator {
    pub fn new(filter: SourceFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &SourceFilter {
        &self.filter
    }

    /// Lists the store once. Backend failures are returned as-is; there is no retry.
    pub async fn enumerate<S>(&self, store: &S, prefix: &str) -> Result<SourceListing, StorageError>
    where
        S: ObjectStore + ?Sized,
    {
        let entries = store.list(prefix).await?;
        let listed = entries.len();
        let listing: SourceListing = entries
            .iter()
            .filter_map(|entry| self.filter.admit(entry))
            .collect();

        info!(listed, accepted = listing.len(), prefix, "enumerated sources");
        Ok(listing)
    }

    /// Resolves explicitly named locators. Unknown extensions and objects that
    /// no longer exist are skipped; only a backend failure is an error.
    pub async fn resolve<S>(&self, store: &S, locators: &[String]) -> Result<SourceListing, StorageError>
    where
        S: ObjectStore + ?Sized,
    {
        let mut documents = Vec::new();
        let mut seen = HashSet::new();

        for locator in locators {
            if !seen.insert(locator.as_str()) {
                continue;
            }
            let Some(file_type) = self.filter.file_type_of(locator) else {
                warn!(locator = %locator, "skipping locator with unsupported extension");
                continue;
            };
            if !store.exists(locator).await? {
                warn!(locator = %locator, "skipping locator missing from storage");
                continue;
            }
            documents.push(SourceDocument {
                locator: locator.clone(),
                file_type,
                size: 0,
                modified_at: None,
            });
        }

        Ok(SourceListing { documents })
    }
}
