//! Core data models used throughout llkms.
//!
//! These types represent the documents, chunks, index entries, and retrieval
//! results that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LoadError;

/// Format tag detected from a document's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Image,
    Word,
    Html,
}

impl DocumentFormat {
    /// Detect the format from a key or path, case-insensitively.
    ///
    /// Returns `None` for extensions outside the supported set.
    pub fn from_key(key: &str) -> Option<Self> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "md" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            "png" | "jpg" | "jpeg" => Some(DocumentFormat::Image),
            "docx" => Some(DocumentFormat::Word),
            "html" | "htm" => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
            DocumentFormat::Word => "word",
            DocumentFormat::Html => "html",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw document fetched from object storage.
///
/// Lives only until it has been extracted and chunked.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source key (S3 object key or path relative to the local root).
    pub id: String,
    pub content: Vec<u8>,
    pub format: DocumentFormat,
}

impl Document {
    /// Build a document, detecting its format from `id`.
    ///
    /// Fails with [`LoadError::UnsupportedFormat`] for unknown extensions.
    pub fn new(id: impl Into<String>, content: Vec<u8>) -> Result<Self, LoadError> {
        let id = id.into();
        let Some(format) = DocumentFormat::from_key(&id) else {
            return Err(LoadError::UnsupportedFormat(id));
        };
        Ok(Self {
            id,
            content,
            format,
        })
    }
}

/// A chunk of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
    /// Character offset of the chunk's first character in the normalized text.
    pub start: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// One embedded chunk inside a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned by a similarity query, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl RetrievedChunk {
    /// The source document the chunk came from.
    pub fn source(&self) -> &str {
        &self.chunk.document_id
    }

    /// Character offset of the chunk in its source document.
    pub fn position(&self) -> usize {
        self.chunk.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(
            DocumentFormat::from_key("knowledge/notes.TXT"),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            DocumentFormat::from_key("a/b/report.pdf"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_key("scan.JPeG"),
            Some(DocumentFormat::Image)
        );
        assert_eq!(
            DocumentFormat::from_key("memo.docx"),
            Some(DocumentFormat::Word)
        );
        assert_eq!(
            DocumentFormat::from_key("page.htm"),
            Some(DocumentFormat::Html)
        );
    }

    #[test]
    fn rejects_unknown_or_missing_extensions() {
        assert_eq!(DocumentFormat::from_key("archive.zip"), None);
        assert_eq!(DocumentFormat::from_key("README"), None);
        assert_eq!(DocumentFormat::from_key("dir.pdf/README"), None);
        assert!(matches!(
            Document::new("data.bin", vec![1, 2, 3]),
            Err(LoadError::UnsupportedFormat(id)) if id == "data.bin"
        ));
    }
}
