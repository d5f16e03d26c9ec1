//! In-memory vector index with on-disk persistence.
//!
//! A [`VectorIndex`] holds one [`IndexEntry`] per chunk, in chunk order
//! (documents sorted by id, chunks by sequence index). Retrieval is an
//! exhaustive cosine-similarity scan, which is plenty for knowledge bases of
//! a few thousand chunks.
//!
//! # Persistence
//!
//! The index is stored as a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "fingerprint": "9f86d0…",
//!   "model": "text-embedding-3-small",
//!   "dims": 1536,
//!   "entries": [ { "chunk": { … }, "vector": "<base64 of LE f32 bytes>" } ]
//! }
//! ```
//!
//! Writes go to a sibling temporary file that is then renamed over the
//! target, so a crash never leaves a half-written cache behind.
//!
//! # Cache policy
//!
//! [`IndexCache::probe`] compares the stored fingerprint and model name with
//! the current ones. Only an exact match is a hit; anything unreadable is
//! reported as [`CacheProbe::Corrupt`] so the caller can rebuild.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::CacheCorruptionError;
use crate::fingerprint::CacheFingerprint;
use crate::models::{Chunk, IndexEntry, RetrievedChunk};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct VectorIndex {
    fingerprint: CacheFingerprint,
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed `chunks` in batches of `batch_size` and build an index.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
        fingerprint: CacheFingerprint,
    ) -> Result<Self> {
        Self::build_with_progress(chunks, embedder, batch_size, fingerprint, |_, _| {}).await
    }

    /// Like [`build`](Self::build), calling `on_batch(embedded, total)` after each batch.
    pub async fn build_with_progress<F>(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
        fingerprint: CacheFingerprint,
        mut on_batch: F,
    ) -> Result<Self>
    where
        F: FnMut(usize, usize) + Send,
    {
        let dims = embedder.dims();
        let total = chunks.len();
        let mut entries = Vec::with_capacity(total);

        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Embedding failed for batch of {} chunks", texts.len()))?;

            if vectors.len() != batch.len() {
                bail!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != dims {
                    bail!(
                        "Embedding dimension mismatch for {}#{}: expected {}, got {}",
                        chunk.document_id,
                        chunk.index,
                        dims,
                        vector.len()
                    );
                }
                if !all_finite(&vector) {
                    bail!(
                        "Embedding for {}#{} contains non-finite values",
                        chunk.document_id,
                        chunk.index
                    );
                }
                entries.push(IndexEntry {
                    chunk: chunk.clone(),
                    vector,
                });
            }
            on_batch(entries.len(), total);
        }

        tracing::debug!(
            chunks = entries.len(),
            model = embedder.model_name(),
            "built vector index"
        );

        Ok(Self {
            fingerprint,
            model: embedder.model_name().to_string(),
            dims,
            entries,
        })
    }

    pub fn fingerprint(&self) -> &CacheFingerprint {
        &self.fingerprint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `k` entries by cosine similarity, descending; ties keep chunk order.
    pub fn query(&self, question: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(question, &entry.vector)))
            .collect();

        // NaN sorts last so a bad vector can never break the ordering.
        scored.sort_by(|a, b| {
            rank(b.1)
                .total_cmp(&rank(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievedChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Embed `question` with `embedder` and return the top `k` chunks.
    pub async fn search(
        &self,
        embedder: &dyn Embedder,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let vector = embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        if vector.len() != self.dims {
            bail!(
                "Question embedding has {} dimensions, index has {}",
                vector.len(),
                self.dims
            );
        }

        Ok(self.query(&vector, k))
    }

    /// Persist to `path` via a temporary file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }

        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            fingerprint: self.fingerprint.to_string(),
            model: self.model.clone(),
            dims: self.dims,
            entries: self
                .entries
                .iter()
                .map(|e| PersistedEntry {
                    chunk: e.chunk.clone(),
                    vector: STANDARD.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        };
        let json = serde_json::to_vec(&persisted)?;

        let tmp = temp_path(path);
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write index cache: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move index cache into place: {}", path.display()))?;

        tracing::debug!(path = %path.display(), entries = self.entries.len(), "saved index cache");
        Ok(())
    }

    /// Restore an index saved with [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, CacheCorruptionError> {
        let corrupt = |reason: String| CacheCorruptionError {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| corrupt(e.to_string()))?;
        let persisted: PersistedIndex =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

        if persisted.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                persisted.version
            )));
        }

        let expected_bytes = persisted
            .dims
            .checked_mul(4)
            .filter(|&n| n > 0)
            .ok_or_else(|| corrupt(format!("invalid dimension count {}", persisted.dims)))?;

        let mut entries = Vec::with_capacity(persisted.entries.len());
        for entry in persisted.entries {
            let blob = STANDARD
                .decode(entry.vector.as_bytes())
                .map_err(|e| corrupt(format!("bad vector encoding: {}", e)))?;
            if blob.len() != expected_bytes {
                return Err(corrupt(format!(
                    "vector for {}#{} has {} bytes, expected {}",
                    entry.chunk.document_id,
                    entry.chunk.index,
                    blob.len(),
                    expected_bytes
                )));
            }
            let vector = blob_to_vec(&blob);
            if !all_finite(&vector) {
                return Err(corrupt(format!(
                    "vector for {}#{} contains non-finite values",
                    entry.chunk.document_id, entry.chunk.index
                )));
            }
            entries.push(IndexEntry {
                chunk: entry.chunk,
                vector,
            });
        }

        Ok(Self {
            fingerprint: CacheFingerprint::from(persisted.fingerprint),
            model: persisted.model,
            dims: persisted.dims,
            entries,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    fingerprint: String,
    model: String,
    dims: usize,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk: Chunk,
    vector: String,
}

fn all_finite(vector: &[f32]) -> bool {
    vector.iter().all(|v| v.is_finite())
}

fn rank(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Result of checking the persisted index against the current document set.
#[derive(Debug)]
pub enum CacheProbe {
    /// Fingerprint and model match; the index can be used as is.
    Hit(VectorIndex),
    /// A valid index exists but was built from different documents or another model.
    Stale,
    Missing,
    Corrupt(CacheCorruptionError),
}

/// The persisted index at a fixed location.
#[derive(Debug, Clone)]
pub struct IndexCache {
    path: PathBuf,
}

impl IndexCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn probe(&self, fingerprint: &CacheFingerprint, model: &str) -> CacheProbe {
        if !self.path.exists() {
            return CacheProbe::Missing;
        }

        match VectorIndex::load(&self.path) {
            Ok(index) if index.fingerprint == *fingerprint && index.model == model => {
                CacheProbe::Hit(index)
            }
            Ok(index) => {
                tracing::debug!(
                    cached_fingerprint = %index.fingerprint,
                    current_fingerprint = %fingerprint,
                    cached_model = index.model.as_str(),
                    current_model = model,
                    "index cache is stale"
                );
                CacheProbe::Stale
            }
            Err(e) => CacheProbe::Corrupt(e),
        }
    }

    pub fn store(&self, index: &VectorIndex) -> Result<()> {
        index.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use tempfile::TempDir;

    fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            document_id: doc.to_string(),
            index,
            text: text.to_string(),
            overlap: 0,
            start: index * 100,
            hash: format!("h{}", index),
        }
    }

    fn fingerprint(tag: &str) -> CacheFingerprint {
        CacheFingerprint::from(tag.to_string())
    }

    fn manual_index(vectors: Vec<Vec<f32>>) -> VectorIndex {
        let dims = vectors[0].len();
        VectorIndex {
            fingerprint: fingerprint("fp"),
            model: "manual".to_string(),
            dims,
            entries: vectors
                .into_iter()
                .enumerate()
                .map(|(i, vector)| IndexEntry {
                    chunk: chunk("doc.txt", i, &format!("chunk {}", i)),
                    vector,
                })
                .collect(),
        }
    }

    #[test]
    fn query_orders_by_descending_score() {
        let index = manual_index(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.7, 0.7],
        ]);
        let hits = index.query(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[test]
    fn query_ties_keep_chunk_order() {
        let index = manual_index(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![2.0, 0.0],
            vec![3.0, 0.0],
        ]);
        let hits = index.query(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn query_k_larger_than_index() {
        let index = manual_index(vec![vec![1.0, 0.0]]);
        assert_eq!(index.query(&[1.0, 0.0], 10).len(), 1);
        assert!(index.query(&[1.0, 0.0], 0).is_empty());
    }

    #[tokio::test]
    async fn build_embeds_every_chunk() {
        let embedder = HashingEmbedder::new(32);
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk("a.txt", i, "some words")).collect();
        let mut batches = Vec::new();
        let index = VectorIndex::build_with_progress(
            chunks,
            &embedder,
            2,
            fingerprint("fp"),
            |n, total| batches.push((n, total)),
        )
        .await
        .unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.dims(), 32);
        assert_eq!(index.model(), "hash-trigram-32");
        assert_eq!(batches, vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn save_then_load_preserves_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache").join("index.json");
        let index = manual_index(vec![vec![0.25, -1.5], vec![3.0, 0.125]]);

        index.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.fingerprint(), index.fingerprint());
        assert_eq!(loaded.model(), "manual");
        assert_eq!(loaded.entries(), index.entries());
    }

    #[test]
    fn probe_reports_hit_stale_missing_and_corrupt() {
        let tmp = TempDir::new().unwrap();
        let cache = IndexCache::new(tmp.path().join("index.json"));
        assert!(matches!(
            cache.probe(&fingerprint("fp"), "manual"),
            CacheProbe::Missing
        ));

        cache
            .store(&manual_index(vec![vec![1.0, 0.0]]))
            .unwrap();
        assert!(matches!(
            cache.probe(&fingerprint("fp"), "manual"),
            CacheProbe::Hit(_)
        ));
        assert!(matches!(
            cache.probe(&fingerprint("other"), "manual"),
            CacheProbe::Stale
        ));
        assert!(matches!(
            cache.probe(&fingerprint("fp"), "other-model"),
            CacheProbe::Stale
        ));

        std::fs::write(cache.path(), b"{ not json").unwrap();
        assert!(matches!(
            cache.probe(&fingerprint("fp"), "manual"),
            CacheProbe::Corrupt(_)
        ));
    }

    #[test]
    fn load_rejects_truncated_vectors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        let json = serde_json::json!({
            "version": 1,
            "fingerprint": "fp",
            "model": "manual",
            "dims": 2,
            "entries": [{
                "chunk": chunk("a.txt", 0, "x"),
                "vector": STANDARD.encode(vec_to_blob(&[1.0])),
            }]
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(err.reason.contains("expected 8"));
    }

    fn write_raw_cache(path: &Path, dims: usize, vector: &[f32]) {
        let json = serde_json::json!({
            "version": 1,
            "fingerprint": "fp",
            "model": "manual",
            "dims": dims,
            "entries": [{
                "chunk": chunk("a.txt", 0, "x"),
                "vector": STANDARD.encode(vec_to_blob(vector)),
            }]
        });
        std::fs::write(path, serde_json::to_vec(&json).unwrap()).unwrap();
    }

    #[test]
    fn query_survives_nan_scores() {
        let vectors: Vec<Vec<f32>> = (0..64)
            .map(|i| {
                if i % 3 == 0 {
                    vec![f32::NAN, 1.0]
                } else {
                    vec![1.0, (i % 5) as f32]
                }
            })
            .collect();
        let index = manual_index(vectors);

        let hits = index.query(&[1.0, 0.0], 64);
        assert_eq!(hits.len(), 64);
        let first_nan = hits.iter().position(|h| h.score.is_nan()).unwrap();
        assert!(hits[..first_nan].iter().all(|h| !h.score.is_nan()));
        assert!(hits[first_nan..].iter().all(|h| h.score.is_nan()));
        assert_eq!(hits[0].chunk.index, 5);
    }

    #[test]
    fn load_rejects_non_finite_vectors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        write_raw_cache(&path, 2, &[f32::NAN, 1.0]);
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(err.reason.contains("non-finite"), "got: {}", err.reason);

        write_raw_cache(&path, 2, &[f32::INFINITY, 1.0]);
        assert!(VectorIndex::load(&path).is_err());

        let cache = IndexCache::new(&path);
        assert!(matches!(
            cache.probe(&fingerprint("fp"), "manual"),
            CacheProbe::Corrupt(_)
        ));
    }

    #[test]
    fn load_rejects_impossible_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");

        write_raw_cache(&path, usize::MAX / 2, &[1.0]);
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(err.reason.contains("invalid dimension count"), "got: {}", err.reason);

        write_raw_cache(&path, 0, &[]);
        assert!(VectorIndex::load(&path).is_err());
    }

    struct OverflowEmbedder;

    #[async_trait::async_trait]
    impl Embedder for OverflowEmbedder {
        fn model_name(&self) -> &str {
            "overflow"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![f32::INFINITY, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn build_rejects_non_finite_embeddings() {
        let chunks = vec![chunk("a.txt", 0, "text")];
        let err = VectorIndex::build(chunks, &OverflowEmbedder, 8, fingerprint("fp"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-finite"), "got: {}", err);
    }
}
