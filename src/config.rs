//! TOML configuration parsing and validation.
//!
//! String values written exactly as `${VAR}` are replaced by the value of the
//! environment variable `VAR` (empty when unset). A `.env` file in the working
//! directory is loaded before resolution.
//!
//! ```toml
//! [storage]
//! kind = "s3"
//! bucket = "eng-llkms"
//! prefix = "knowledge"
//! region = "eu-central-1"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [model]
//! provider = "deepseek"
//! model = "deepseek-chat"
//! api_key = "${DEEPSEEK_API_KEY}"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::pricing::PricingEntry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-provider, per-model price overrides.
    #[serde(default)]
    pub pricing: HashMap<String, HashMap<String, PricingEntry>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"s3"` or `"local"`.
    #[serde(default = "default_storage_kind")]
    pub kind: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Root directory for `kind = "local"`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_storage_kind() -> String {
    "s3".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            api_key: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_model_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_prompt_tokens: default_max_prompt_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_max_prompt_tokens() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("vector_store_cache/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `"tesseract"` or `"disabled"`.
    #[serde(default = "default_ocr_engine")]
    pub engine: String,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_languages")]
    pub languages: Vec<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: default_ocr_engine(),
            command: default_ocr_command(),
            languages: default_ocr_languages(),
        }
    }
}

fn default_ocr_engine() -> String {
    "tesseract".to_string()
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "debug".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    // Missing .env is fine.
    let _ = dotenv::dotenv();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    let resolved = resolve_env_vars(raw);
    let config: Config = resolved
        .try_into()
        .with_context(|| "Invalid configuration")?;

    validate(&config)?;
    Ok(config)
}

/// Recursively replace `${VAR}` string values with environment values.
pub fn resolve_env_vars(value: toml::Value) -> toml::Value {
    match value {
        toml::Value::String(s) => toml::Value::String(resolve_env_str(&s)),
        toml::Value::Array(items) => {
            toml::Value::Array(items.into_iter().map(resolve_env_vars).collect())
        }
        toml::Value::Table(table) => toml::Value::Table(
            table
                .into_iter()
                .map(|(k, v)| (k, resolve_env_vars(v)))
                .collect(),
        ),
        other => other,
    }
}

fn resolve_env_str(value: &str) -> String {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => value.to_string(),
    }
}

fn validate(config: &Config) -> Result<()> {
    match config.storage.kind.as_str() {
        "s3" => {
            if config.storage.bucket.is_empty() {
                bail!("storage.bucket must be set when storage.kind is 's3'");
            }
        }
        "local" => {
            if config.storage.root.is_none() {
                bail!("storage.root must be set when storage.kind is 'local'");
            }
        }
        other => bail!(
            "Unknown storage kind: '{}'. Must be s3 or local.",
            other
        ),
    }

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_prompt_tokens == 0 {
        bail!("retrieval.max_prompt_tokens must be > 0");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "hash" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, hash, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.model.provider.as_str() {
        "openai" | "deepseek" | "ollama" => {}
        other => bail!(
            "Unsupported provider: {}. Must be openai, deepseek, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.model.temperature) {
        bail!("model.temperature must be in [0.0, 2.0]");
    }
    if config.model.max_tokens == 0 {
        bail!("model.max_tokens must be > 0");
    }

    match config.ocr.engine.as_str() {
        "tesseract" | "disabled" => {}
        other => bail!(
            "Unknown OCR engine: '{}'. Must be tesseract or disabled.",
            other
        ),
    }

    if config.loading.workers == 0 {
        bail!("loading.workers must be >= 1");
    }

    Ok(())
}
