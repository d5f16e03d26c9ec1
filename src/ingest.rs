//! Ingestion pipeline orchestration.
//!
//! Coordinates the indexing flow: object store → download → fingerprint →
//! cache check → extraction → chunking → embedding → cache write.
//!
//! The fingerprint is taken over the downloaded raw bytes, before any
//! extraction, so an unchanged document set is answered from the cache
//! without running OCR, text extraction or the embedding model. Writing the
//! cache is non-fatal on failure.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::fingerprint::CacheFingerprint;
use crate::index::{CacheProbe, IndexCache, VectorIndex};
use crate::loader::DocumentLoader;
use crate::models::{Document, DocumentFormat};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::traits::ObjectStore;

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub prefix: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub workers: usize,
    /// Ignore the cache and rebuild.
    pub reindex: bool,
}

impl IndexSettings {
    pub fn from_config(config: &Config, reindex: bool) -> Self {
        Self {
            prefix: config.storage.prefix.clone(),
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size,
            workers: config.loading.workers,
            reindex,
        }
    }
}

/// Where the prepared index came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOrigin {
    Cache,
    Built {
        documents_loaded: usize,
        documents_skipped: usize,
    },
}

#[derive(Debug)]
pub struct PreparedIndex {
    pub index: VectorIndex,
    pub origin: IndexOrigin,
    /// Documents downloaded (and fingerprinted).
    pub documents: usize,
}

/// Components needed to turn a store into an index.
pub struct Indexer {
    pub store: Arc<dyn ObjectStore>,
    pub loader: DocumentLoader,
    pub embedder: Arc<dyn Embedder>,
    pub cache: IndexCache,
}

impl Indexer {
    /// Build the index or load it from the cache.
    ///
    /// # Errors
    ///
    /// - listing the store fails
    /// - no document could be downloaded, or none yielded any text
    /// - the embedder fails while building
    pub async fn prepare(
        &self,
        settings: &IndexSettings,
        progress: &dyn IndexProgressReporter,
    ) -> Result<PreparedIndex> {
        progress.report(IndexProgressEvent::Listing {
            location: format!("{}/{}", self.store.location(), settings.prefix),
        });
        let keys = self
            .store
            .list(&settings.prefix)
            .await
            .with_context(|| format!("Failed to list documents in {}", self.store.location()))?;

        let keys: Vec<String> = keys
            .into_iter()
            .filter(|key| {
                if key.ends_with('/') {
                    return false;
                }
                if DocumentFormat::from_key(key).is_none() {
                    tracing::info!(key = key.as_str(), "skipping unsupported file type");
                    return false;
                }
                true
            })
            .collect();
        tracing::info!(count = keys.len(), "found supported documents");

        let documents = self.download_all(keys, settings.workers).await;
        if documents.is_empty() {
            bail!("No documents were successfully processed");
        }
        let document_count = documents.len();

        let fingerprint = CacheFingerprint::compute(&documents);
        if settings.reindex {
            tracing::info!("reindex requested; ignoring index cache");
        } else {
            match self.cache.probe(&fingerprint, self.embedder.model_name()) {
                CacheProbe::Hit(index) => {
                    tracing::info!(
                        path = %self.cache.path().display(),
                        chunks = index.len(),
                        "loaded index from cache"
                    );
                    progress.report(IndexProgressEvent::CacheHit {
                        chunks: index.len() as u64,
                    });
                    return Ok(PreparedIndex {
                        index,
                        origin: IndexOrigin::Cache,
                        documents: document_count,
                    });
                }
                CacheProbe::Stale => tracing::info!("documents changed; rebuilding index"),
                CacheProbe::Missing => tracing::info!("no index cache; building index"),
                CacheProbe::Corrupt(e) => {
                    tracing::warn!(error = %e, "index cache unreadable; rebuilding")
                }
            }
        }

        let loaded = self
            .loader
            .load_all(documents, |n, total| {
                progress.report(IndexProgressEvent::Loading {
                    n: n as u64,
                    total: total as u64,
                })
            })
            .await;
        if loaded.is_empty() {
            bail!("No documents were successfully processed");
        }
        let documents_loaded = loaded.len();

        let chunks: Vec<_> = loaded
            .iter()
            .flat_map(|doc| chunk::split(&doc.id, &doc.text, settings.chunk_size, settings.overlap))
            .collect();
        if chunks.is_empty() {
            bail!(
                "No text could be extracted from {} loaded documents",
                documents_loaded
            );
        }
        tracing::info!(
            documents = documents_loaded,
            chunks = chunks.len(),
            "split documents into chunks"
        );

        let index = VectorIndex::build_with_progress(
            chunks,
            self.embedder.as_ref(),
            settings.batch_size,
            fingerprint,
            |n, total| {
                progress.report(IndexProgressEvent::Embedding {
                    n: n as u64,
                    total: total as u64,
                })
            },
        )
        .await?;

        if let Err(e) = self.cache.store(&index) {
            tracing::warn!(error = %format!("{:#}", e), "failed to save index cache");
        }

        Ok(PreparedIndex {
            index,
            origin: IndexOrigin::Built {
                documents_loaded,
                documents_skipped: document_count - documents_loaded,
            },
            documents: document_count,
        })
    }

    /// Download keys on a bounded pool, skipping failures.
    async fn download_all(&self, keys: Vec<String>, workers: usize) -> Vec<Document> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for key in keys {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = store.download(&key).await;
                (key, result)
            });
        }

        let mut documents = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(content))) => match Document::new(key, content) {
                    Ok(doc) => documents.push(doc),
                    Err(e) => tracing::info!(error = %e, "skipping document"),
                },
                Ok((key, Err(e))) => {
                    tracing::warn!(key = key.as_str(), error = %e, "failed to download document")
                }
                Err(e) => tracing::error!(error = %e, "download task failed"),
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        documents
    }
}
