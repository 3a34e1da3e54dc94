use crate::models::ObjectEntry;
use crate::traits::ObjectStore;
use crate::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A directory tree standing in for a bucket. Locators are `/`-separated
/// paths relative to the root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if locator.is_empty() || escapes {
            return Err(StorageError::NotFound(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn locator_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        if !self.root.is_dir() {
            return Err(StorageError::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let root = self.root.clone();
        let prefix = prefix.to_string();
        let entries = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(|item| item.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(locator) = locator_for(&root, entry.path()) else {
                    continue;
                };
                if !locator.starts_with(&prefix) {
                    continue;
                }
                let metadata = entry.metadata().ok();
                entries.push(ObjectEntry {
                    locator,
                    size: metadata.as_ref().map(|meta| meta.len()).unwrap_or(0),
                    modified_at: metadata
                        .and_then(|meta| meta.modified().ok())
                        .map(DateTime::<Utc>::from),
                });
            }
            entries.sort_unstable_by(|left, right| left.locator.cmp(&right.locator));
            entries
        })
        .await
        .map_err(|error| StorageError::Unreachable(error.to_string()))?;

        Ok(entries)
    }

    async fn read(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(locator.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, locator: &str) -> Result<bool, StorageError> {
        let Ok(path) = self.resolve(locator) else {
            return Ok(false);
        };
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    fn public_url(&self, locator: &str) -> String {
        format!("file://{}", self.root.join(locator).display())
    }

    async fn health_check(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn listing_is_recursive_with_relative_locators() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("reports").join("2024");
        fs::create_dir_all(&nested)?;
        fs::write(dir.path().join("a.txt"), b"alpha")?;
        fs::write(nested.join("b.csv"), b"x,y\n1,2\n")?;

        let store = LocalStore::new(dir.path());
        let entries = store.list("").await?;

        let locators: Vec<_> = entries.iter().map(|entry| entry.locator.as_str()).collect();
        assert_eq!(locators, vec!["a.txt", "reports/2024/b.csv"]);
        assert_eq!(entries[0].size, 5);
        assert!(entries[0].modified_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn listing_honours_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("in"))?;
        fs::write(dir.path().join("in").join("keep.txt"), b"k")?;
        fs::write(dir.path().join("skip.txt"), b"s")?;

        let entries = LocalStore::new(dir.path()).list("in/").await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].locator, "in/keep.txt");
        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_unreachable() {
        let store = LocalStore::new("/definitely/not/here");
        assert!(matches!(
            store.list("").await,
            Err(StorageError::Unreachable(_))
        ));
        assert!(!store.health_check().await);
    }

    #[tokio::test]
    async fn read_and_exists_stay_inside_root() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("doc.txt"), b"body")?;
        let store = LocalStore::new(dir.path());

        assert_eq!(store.read("doc.txt").await?, b"body");
        assert!(store.exists("doc.txt").await?);
        assert!(!store.exists("gone.txt").await?);
        assert!(!store.exists("../doc.txt").await?);
        assert!(matches!(
            store.read("gone.txt").await,
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }
}
