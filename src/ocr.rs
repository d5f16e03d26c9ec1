//! OCR capability for image documents.
//!
//! The default engine shells out to the `tesseract` binary, piping the image
//! on stdin and reading recognized text from stdout. Engines are synchronous
//! and are called from blocking worker threads.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::config::OcrConfig;

pub trait OcrEngine: Send + Sync {
    /// Recognized text; an image without text yields an empty string.
    fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Runs `tesseract stdin stdout -l <langs>`.
pub struct TesseractOcr {
    command: String,
    languages: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, languages: &[String]) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self {
            command: command.into(),
            languages,
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.languages])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is tesseract installed?", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("tesseract stdin unavailable"))?;
        let image = image.to_vec();
        // Write on a separate thread so a full stdout pipe cannot deadlock us.
        let writer = std::thread::spawn(move || stdin.write_all(&image));

        let output = child
            .wait_with_output()
            .with_context(|| "Failed to wait for tesseract")?;
        match writer.join() {
            Ok(Ok(())) => {}
            // tesseract may exit early on unreadable input; its stderr explains why.
            Ok(Err(e)) if output.status.success() => {
                return Err(e).with_context(|| "Failed to write image to tesseract");
            }
            Ok(Err(_)) => {}
            Err(_) => bail!("tesseract stdin writer panicked"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tesseract failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Refuses every image; image documents are skipped.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _image: &[u8]) -> Result<String> {
        bail!("OCR is disabled (ocr.engine = \"disabled\")")
    }
}

pub fn create_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>> {
    match config.engine.as_str() {
        "tesseract" => Ok(Arc::new(TesseractOcr::new(
            config.command.clone(),
            &config.languages,
        ))),
        "disabled" => Ok(Arc::new(DisabledOcr)),
        other => bail!("Unknown OCR engine: {}", other),
    }
}
