//! Document loading: raw bytes to plain text, by format.
//!
//! [`DocumentLoader::load`] dispatches on [`DocumentFormat`]; images go to the
//! configured [`OcrEngine`]. [`DocumentLoader::load_all`] runs loads on a
//! bounded pool of blocking threads and drops documents that fail, logging
//! each failure.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::LoadError;
use crate::extract;
use crate::models::{Document, DocumentFormat};
use crate::ocr::OcrEngine;

/// Text extracted from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub id: String,
    pub format: DocumentFormat,
    pub text: String,
}

#[derive(Clone)]
pub struct DocumentLoader {
    ocr: Arc<dyn OcrEngine>,
    workers: usize,
}

impl DocumentLoader {
    pub fn new(ocr: Arc<dyn OcrEngine>, workers: usize) -> Self {
        Self {
            ocr,
            workers: workers.max(1),
        }
    }

    /// Extract the text of a single document. No side effects.
    pub fn load(&self, document: &Document) -> Result<String, LoadError> {
        let fail = |reason: String| LoadError::extraction(&document.id, document.format, reason);

        match document.format {
            DocumentFormat::Text => Ok(extract::extract_plain(&document.content)),
            DocumentFormat::Pdf => {
                extract::extract_pdf(&document.content).map_err(|e| fail(e.to_string()))
            }
            DocumentFormat::Word => {
                extract::extract_docx(&document.content).map_err(|e| fail(e.to_string()))
            }
            DocumentFormat::Html => {
                extract::extract_html(&document.content).map_err(|e| fail(e.to_string()))
            }
            DocumentFormat::Image => self
                .ocr
                .recognize(&document.content)
                .map_err(|e| fail(format!("{:#}", e))),
        }
    }

    /// Load every document concurrently, skipping failures.
    ///
    /// Results are sorted by document id. `on_loaded(done, total)` is called
    /// as each document finishes, successful or not.
    pub async fn load_all<F>(&self, documents: Vec<Document>, mut on_loaded: F) -> Vec<LoadedDocument>
    where
        F: FnMut(usize, usize),
    {
        let total = documents.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for document in documents {
            let semaphore = Arc::clone(&semaphore);
            let loader = self.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let id = document.id.clone();
                let format = document.format;
                let result = tokio::task::spawn_blocking(move || loader.load(&document)).await;
                (id, format, result)
            });
        }

        let mut loaded = Vec::with_capacity(total);
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            on_loaded(done, total);

            let (id, format, result) = match joined {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(error = %e, "document load task failed");
                    continue;
                }
            };
            match result {
                Ok(Ok(text)) => {
                    tracing::debug!(document = %id, %format, chars = text.len(), "loaded document");
                    loaded.push(LoadedDocument { id, format, text });
                }
                Ok(Err(e)) => tracing::warn!(document = %id, error = %e, "skipping document"),
                Err(e) => tracing::warn!(document = %id, error = %e, "extraction worker failed; skipping document"),
            }
        }

        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::DisabledOcr;
    use anyhow::Result;

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _image: &[u8]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn doc(id: &str, content: &[u8]) -> Document {
        Document::new(id, content.to_vec()).unwrap()
    }

    #[test]
    fn images_go_through_ocr() {
        let loader = DocumentLoader::new(Arc::new(FixedOcr("scanned words")), 1);
        assert_eq!(loader.load(&doc("scan.PNG", b"png")).unwrap(), "scanned words");
    }

    #[test]
    fn empty_ocr_result_is_not_an_error() {
        let loader = DocumentLoader::new(Arc::new(FixedOcr("")), 1);
        assert_eq!(loader.load(&doc("blank.jpg", b"jpg")).unwrap(), "");
    }

    #[test]
    fn disabled_ocr_fails_with_extraction_error() {
        let loader = DocumentLoader::new(Arc::new(DisabledOcr), 1);
        let err = loader.load(&doc("scan.jpeg", b"jpg")).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Extraction {
                format: DocumentFormat::Image,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn load_all_skips_failures_and_sorts_by_id() {
        let loader = DocumentLoader::new(Arc::new(DisabledOcr), 3);
        let documents = vec![
            doc("c.txt", b"gamma"),
            doc("broken.docx", b"not a zip"),
            doc("a.txt", b"alpha"),
            doc("photo.png", b"png"),
            doc("b.md", b"beta"),
        ];

        let mut progress = Vec::new();
        let loaded = loader
            .load_all(documents, |done, total| progress.push((done, total)))
            .await;

        let ids: Vec<&str> = loaded.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.md", "c.txt"]);
        assert_eq!(loaded[0].text, "alpha");
        assert_eq!(progress.len(), 5);
        assert_eq!(progress.last(), Some(&(5, 5)));
    }
}
