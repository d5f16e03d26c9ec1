//! Local directory object store.
//!
//! Serves documents from `storage.root` for offline use. Keys are paths
//! relative to the root with `/` separators, so an index built from a local
//! mirror of a bucket has the same document ids as one built from S3.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::error::StorageAccessError;
use crate::traits::{relative_key, KeyFilter, ObjectStore};

pub struct LocalStore {
    root: PathBuf,
    filter: KeyFilter,
}

impl LocalStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let root = match &config.root {
            Some(root) => root.clone(),
            None => bail!("storage.root must be set when storage.kind is 'local'"),
        };
        Ok(Self {
            root,
            filter: KeyFilter::new(&config.include_globs, &config.exclude_globs)?,
        })
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageAccessError> {
        if !self.root.is_dir() {
            return Err(StorageAccessError::new(
                self.location(),
                "root directory does not exist",
            ));
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| StorageAccessError::new(self.location(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if !key.starts_with(prefix.trim_start_matches('/')) {
                continue;
            }
            if !self.filter.matches(relative_key(&key, prefix)) {
                continue;
            }
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageAccessError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageAccessError::new(key, "key escapes the storage root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageAccessError> {
        self.scan(prefix)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageAccessError> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageAccessError::new(path.display().to_string(), e))
    }
}
