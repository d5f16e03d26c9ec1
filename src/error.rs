//! Error taxonomy for llkms.
//!
//! Per-document failures ([`LoadError`], [`StorageAccessError`]) are logged
//! and skipped by the ingestion pipeline. [`CacheCorruptionError`] triggers a
//! rebuild. [`ModelInvocationError`] fails a single query and leaves the
//! session usable.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::DocumentFormat;

/// Failure turning a raw document into text.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{format} extraction failed for {id}: {reason}")]
    Extraction {
        id: String,
        format: DocumentFormat,
        reason: String,
    },
}

impl LoadError {
    pub fn extraction(id: &str, format: DocumentFormat, reason: impl ToString) -> Self {
        LoadError::Extraction {
            id: id.to_string(),
            format,
            reason: reason.to_string(),
        }
    }
}

/// Listing or downloading from object storage failed.
#[derive(Error, Debug)]
#[error("storage access failed for {location}: {reason}")]
pub struct StorageAccessError {
    pub location: String,
    pub reason: String,
}

impl StorageAccessError {
    pub fn new(location: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// The persisted index exists but cannot be read back.
#[derive(Error, Debug)]
#[error("index cache {path:?} is unreadable: {reason}")]
pub struct CacheCorruptionError {
    pub path: PathBuf,
    pub reason: String,
}

/// Calling the language model failed.
#[derive(Error, Debug)]
pub enum ModelInvocationError {
    #[error("{provider} request failed: {reason}")]
    Transport { provider: String, reason: String },

    #[error("{provider} request timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ModelInvocationError {
    /// HTTP 401/403: bad or missing credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, ModelInvocationError::Status { status, .. } if *status == 401 || *status == 403)
    }

    /// HTTP 429: rate limited or out of quota.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelInvocationError::Status { status, .. } if *status == 429)
    }
}

/// Failure answering a single question.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("failed to embed question: {0}")]
    Embedding(String),

    #[error(transparent)]
    Model(#[from] ModelInvocationError),
}
