//! Deterministic offline embedder based on feature hashing.
//!
//! Each lowercased word contributes its character trigrams (with `#` word
//! boundaries) and the whole word itself to a fixed number of buckets; the
//! result is L2-normalized. Texts that share vocabulary score higher under
//! cosine similarity. No network access and no model download.

use anyhow::Result;
use async_trait::async_trait;

use super::Embedder;
use crate::config::EmbeddingConfig;

const DEFAULT_DIMS: usize = 256;

pub struct HashingEmbedder {
    model: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            model: format!("hash-trigram-{}", dims),
            dims,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut embedder = Self::new(config.dims.unwrap_or(DEFAULT_DIMS));
        // The openai default model name would be misleading here.
        if let Some(model) = config.model.as_ref().filter(|m| m.starts_with("hash")) {
            embedder.model = model.clone();
        }
        embedder
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            self.add_feature(&mut vector, word.as_bytes(), 2.0);

            let padded: Vec<char> = format!("#{}#", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), 1.0);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dims as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
