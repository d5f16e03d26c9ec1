//! Content fingerprint of a document set, used to decide cache validity.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::Document;

/// SHA-256 over the sorted `(id, sha256(content))` pairs of a document set.
///
/// Independent of the order documents were listed or downloaded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFingerprint(String);

impl CacheFingerprint {
    pub fn compute(documents: &[Document]) -> Self {
        Self::from_pairs(
            documents
                .iter()
                .map(|doc| (doc.id.as_str(), content_hash(&doc.content))),
        )
    }

    /// Build from precomputed `(id, content hash)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        let mut pairs: Vec<(&str, String)> = pairs.into_iter().collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        for (id, hash) in &pairs {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
            hasher.update([b'\n']);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheFingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}
