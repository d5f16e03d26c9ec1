//! Object storage capability.
//!
//! Documents come from an [`ObjectStore`]: either an S3 bucket
//! ([`S3Store`](crate::connector_s3::S3Store)) or a local directory
//! ([`LocalStore`](crate::connector_fs::LocalStore)). The ingestion pipeline
//! only sees keys and bytes.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          ObjectStore         │
//! │  ┌──────────┐ ┌───────────┐  │
//! │  │ S3Store  │ │ LocalStore│  │
//! │  └──────────┘ └───────────┘  │
//! └──────────────┬───────────────┘
//!                ▼
//!      list() → download() → ingest
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::connector_fs::LocalStore;
use crate::connector_s3::S3Store;
use crate::error::StorageAccessError;

/// A source of raw documents addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, e.g. `s3://bucket/prefix` or a directory path.
    fn location(&self) -> String;

    /// Keys under `prefix` that pass the configured include/exclude globs,
    /// sorted. Directory markers (keys ending in `/`) are never returned.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageAccessError>;

    /// Raw bytes of the object at `key`.
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageAccessError>;
}

/// Include/exclude glob filter applied to keys relative to the listing prefix.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl KeyFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let mut default_excludes = vec!["**/.git/**".to_string()];
        default_excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(&default_excludes)?,
        })
    }

    pub fn matches(&self, relative_key: &str) -> bool {
        !self.exclude.is_match(relative_key) && self.include.is_match(relative_key)
    }
}

/// Strip `prefix` (and a separating `/`) from `key` for glob matching.
pub fn relative_key<'a>(key: &'a str, prefix: &str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return key;
    }
    match key.strip_prefix(prefix) {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => key,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Create the store named by `storage.kind`.
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.kind.as_str() {
        "s3" => Ok(Arc::new(S3Store::new(config)?)),
        "local" => Ok(Arc::new(LocalStore::new(config)?)),
        other => bail!("Unknown storage kind: {}", other),
    }
}
