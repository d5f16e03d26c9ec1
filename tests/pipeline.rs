//! End-to-end tests of indexing and question answering through the library.
//!
//! Storage, embeddings and the language model are replaced by in-process
//! fakes so the full flow (list → download → fingerprint → cache → extract →
//! chunk → embed → retrieve → prompt → model → usage) runs without network.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use llkms::embedding::Embedder;
use llkms::error::{ModelInvocationError, QueryError, StorageAccessError};
use llkms::index::{IndexCache, VectorIndex};
use llkms::interactive::run_interactive;
use llkms::ingest::{IndexOrigin, IndexSettings, Indexer, PreparedIndex};
use llkms::llm::{ChatModel, Completion, CompletionRequest};
use llkms::loader::DocumentLoader;
use llkms::ocr::DisabledOcr;
use llkms::pipeline::{PipelineSettings, QueryPipeline};
use llkms::progress::NoProgress;
use llkms::traits::ObjectStore;
use llkms::usage::{UsageRecord, UsageTracker};

// ─── Test Store ─────────────────────────────────────────────────────

/// Objects held in memory; keys in `broken` fail to download.
struct MemoryStore {
    objects: BTreeMap<String, Vec<u8>>,
    broken: HashSet<String>,
    unlistable: bool,
}

impl MemoryStore {
    fn new(objects: &[(&str, &str)]) -> Self {
        Self {
            objects: objects
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
            broken: HashSet::new(),
            unlistable: false,
        }
    }

    fn unlistable(mut self) -> Self {
        self.unlistable = true;
        self
    }

    fn with_broken(mut self, key: &str) -> Self {
        self.objects.insert(key.to_string(), b"unreachable".to_vec());
        self.broken.insert(key.to_string());
        self
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn location(&self) -> String {
        "memory://test".to_string()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageAccessError> {
        if self.unlistable {
            return Err(StorageAccessError::new(prefix, "access denied"));
        }
        Ok(self
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageAccessError> {
        if self.broken.contains(key) {
            return Err(StorageAccessError::new(key, "connection reset"));
        }
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageAccessError::new(key, "no such key"))
    }
}

// ─── Test Embedder ──────────────────────────────────────────────────

const VOCABULARY: &[&str] = &["cat", "dog", "rock", "mammal", "mineral", "purr", "bark"];

/// One dimension per vocabulary stem; counts words starting with the stem.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        VOCABULARY
            .iter()
            .map(|stem| words.iter().filter(|w| w.starts_with(stem)).count() as f32)
            .collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

// ─── Test Models ────────────────────────────────────────────────────

/// Returns a fixed answer and remembers every request.
struct ScriptedModel {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelInvocationError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Completion {
            text: "  Cats and dogs are mammals.\n".to_string(),
            prompt_tokens: 100,
            completion_tokens: 20,
            cost: 0.001,
        })
    }
}

struct RateLimitedModel;

#[async_trait]
impl ChatModel for RateLimitedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ModelInvocationError> {
        Err(ModelInvocationError::Status {
            provider: "scripted".to_string(),
            status: 429,
            body: "quota exhausted".to_string(),
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

const ANIMALS: &[(&str, &str)] = &[
    ("kb/a_cats.txt", "Cats are small mammals that purr."),
    ("kb/b_dogs.txt", "Dogs are loyal mammals that bark."),
    ("kb/c_rocks.txt", "Rocks are made of minerals."),
];

fn settings(reindex: bool) -> IndexSettings {
    IndexSettings {
        prefix: "kb/".to_string(),
        chunk_size: 1000,
        overlap: 200,
        batch_size: 2,
        workers: 2,
        reindex,
    }
}

fn indexer(store: MemoryStore, embedder: Arc<KeywordEmbedder>, cache_dir: &TempDir) -> Indexer {
    Indexer {
        store: Arc::new(store),
        loader: DocumentLoader::new(Arc::new(DisabledOcr), 2),
        embedder,
        cache: IndexCache::new(cache_dir.path().join("cache/index.json")),
    }
}

async fn prepare(store: MemoryStore, embedder: Arc<KeywordEmbedder>, cache_dir: &TempDir, reindex: bool) -> Result<PreparedIndex> {
    indexer(store, embedder, cache_dir)
        .prepare(&settings(reindex), &NoProgress)
        .await
}

fn pipeline(index: VectorIndex, model: Arc<dyn ChatModel>, top_k: usize) -> QueryPipeline {
    QueryPipeline::new(
        Arc::new(index),
        KeywordEmbedder::new(),
        model,
        Arc::new(UsageTracker::new()),
        PipelineSettings {
            top_k,
            max_prompt_tokens: 3000,
            max_tokens: 256,
            temperature: 0.0,
        },
    )
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn answers_from_the_most_relevant_documents() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    assert_eq!(prepared.documents, 3);
    assert_eq!(prepared.index.len(), 3);

    let model = ScriptedModel::new();
    let pipeline = pipeline(prepared.index, model.clone(), 2);
    let answer = pipeline.answer("What is a mammal?").await.unwrap();

    assert_eq!(answer.text, "Cats and dogs are mammals.");
    let sources: Vec<&str> = answer
        .sources
        .iter()
        .map(|s| s.chunk.document_id.as_str())
        .collect();
    assert_eq!(sources, vec!["kb/a_cats.txt", "kb/b_dogs.txt"]);

    let request = model.last_request();
    assert!(request.user.contains("Cats are small mammals"));
    assert!(request.user.contains("Dogs are loyal mammals"));
    assert!(!request.user.contains("Rocks"));
    assert!(request.user.ends_with("Question: What is a mammal?\n\nAnswer:"));
    assert_eq!(request.max_tokens, 256);
}

#[tokio::test]
async fn usage_accumulates_over_successful_questions() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let pipeline = pipeline(prepared.index, ScriptedModel::new(), 2);

    pipeline.answer("What is a mammal?").await.unwrap();
    pipeline.answer("Which animal can bark?").await.unwrap();

    let usage = pipeline.usage().snapshot();
    assert_eq!(usage.prompt_tokens, 200);
    assert_eq!(usage.completion_tokens, 40);
    assert_eq!(usage.total_tokens, 240);
    assert_eq!(usage.successful_requests, 2);
    assert!((usage.total_cost - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn failed_model_call_records_no_usage() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let pipeline = pipeline(prepared.index, Arc::new(RateLimitedModel), 2);

    let err = pipeline.answer("What is a mammal?").await.unwrap_err();
    match err {
        QueryError::Model(e) => assert!(e.is_rate_limited()),
        other => panic!("expected model error, got {:?}", other),
    }
    assert_eq!(pipeline.usage().snapshot(), UsageRecord::default());
}

#[tokio::test]
async fn empty_question_is_rejected_without_calling_the_model() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let model = ScriptedModel::new();
    let pipeline = pipeline(prepared.index, model.clone(), 2);

    let err = pipeline.answer("   ").await.unwrap_err();
    assert!(matches!(err, QueryError::EmptyQuestion));
    assert!(model.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unchanged_documents_load_from_cache_without_embedding() {
    let tmp = TempDir::new().unwrap();

    let first_embedder = KeywordEmbedder::new();
    let first = prepare(MemoryStore::new(ANIMALS), first_embedder.clone(), &tmp, false)
        .await
        .unwrap();
    assert!(matches!(first.origin, IndexOrigin::Built { .. }));
    assert!(first_embedder.calls() > 0);

    let second_embedder = KeywordEmbedder::new();
    let second = prepare(MemoryStore::new(ANIMALS), second_embedder.clone(), &tmp, false)
        .await
        .unwrap();
    assert_eq!(second.origin, IndexOrigin::Cache);
    assert_eq!(second_embedder.calls(), 0);
    assert_eq!(second.index.len(), first.index.len());
    assert_eq!(second.index.fingerprint(), first.index.fingerprint());
}

#[tokio::test]
async fn reindex_ignores_a_valid_cache() {
    let tmp = TempDir::new().unwrap();
    prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();

    let embedder = KeywordEmbedder::new();
    let rebuilt = prepare(MemoryStore::new(ANIMALS), embedder.clone(), &tmp, true)
        .await
        .unwrap();
    assert!(matches!(rebuilt.origin, IndexOrigin::Built { .. }));
    assert!(embedder.calls() > 0);
}

#[tokio::test]
async fn changed_documents_rebuild_the_index() {
    let tmp = TempDir::new().unwrap();
    let first = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();

    let mut changed = ANIMALS.to_vec();
    changed.push(("kb/d_granite.txt", "Granite is a rock rich in minerals."));
    let second = prepare(MemoryStore::new(&changed), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();

    assert!(matches!(second.origin, IndexOrigin::Built { .. }));
    assert_eq!(second.index.len(), 4);
    assert_ne!(second.index.fingerprint(), first.index.fingerprint());
}

#[tokio::test]
async fn corrupt_cache_is_rebuilt_and_replaced() {
    let tmp = TempDir::new().unwrap();
    let cache_path = tmp.path().join("cache/index.json");
    std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
    std::fs::write(&cache_path, "{ not an index").unwrap();

    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    assert!(matches!(prepared.origin, IndexOrigin::Built { .. }));

    let reloaded = VectorIndex::load(&cache_path).unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.model(), "keyword");
}

#[tokio::test]
async fn failed_downloads_and_unsupported_files_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let mut objects = ANIMALS.to_vec();
    objects.push(("kb/archive.tar", "binary"));
    objects.push(("kb/folder/", ""));
    let store = MemoryStore::new(&objects).with_broken("kb/e_broken.txt");

    let prepared = prepare(store, KeywordEmbedder::new(), &tmp, false).await.unwrap();
    assert_eq!(prepared.documents, 3);
    assert_eq!(
        prepared.origin,
        IndexOrigin::Built {
            documents_loaded: 3,
            documents_skipped: 0,
        }
    );
}

#[tokio::test]
async fn images_without_ocr_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let mut objects = ANIMALS.to_vec();
    objects.push(("kb/scan.png", "not really a png"));

    let prepared = prepare(MemoryStore::new(&objects), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    assert_eq!(prepared.documents, 4);
    assert_eq!(
        prepared.origin,
        IndexOrigin::Built {
            documents_loaded: 3,
            documents_skipped: 1,
        }
    );
}

#[tokio::test]
async fn empty_store_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let err = prepare(MemoryStore::new(&[]), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No documents were successfully processed"));
}

#[tokio::test]
async fn store_with_only_unsupported_files_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new(&[("kb/data.bin", "\x00\x01"), ("kb/app.exe", "MZ")]);
    let err = prepare(store, KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No documents were successfully processed"));
}

#[tokio::test]
async fn equal_scores_keep_document_order() {
    let tmp = TempDir::new().unwrap();
    let twins = [
        ("kb/one.txt", "Cats are mammals."),
        ("kb/two.txt", "Cats are mammals."),
        ("kb/three.txt", "Cats are mammals."),
    ];
    let prepared = prepare(MemoryStore::new(&twins), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let pipeline = pipeline(prepared.index, ScriptedModel::new(), 3);

    let answer = pipeline.answer("cat").await.unwrap();
    let sources: Vec<&str> = answer
        .sources
        .iter()
        .map(|s| s.chunk.document_id.as_str())
        .collect();
    assert_eq!(sources, vec!["kb/one.txt", "kb/three.txt", "kb/two.txt"]);
}

#[tokio::test]
async fn listing_failure_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new(ANIMALS).unlistable();
    let err = prepare(store, KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to list"), "got: {:#}", err);
    assert!(!tmp.path().join("cache/index.json").exists());
}

#[tokio::test]
async fn unwritable_cache_still_yields_an_index() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "a file where the cache directory should be").unwrap();

    let indexer = Indexer {
        store: Arc::new(MemoryStore::new(ANIMALS)),
        loader: DocumentLoader::new(Arc::new(DisabledOcr), 2),
        embedder: KeywordEmbedder::new(),
        cache: IndexCache::new(blocker.join("cache/index.json")),
    };
    let prepared = indexer.prepare(&settings(false), &NoProgress).await.unwrap();

    assert_eq!(prepared.index.len(), 3);
    assert_eq!(
        prepared.origin,
        IndexOrigin::Built {
            documents_loaded: 3,
            documents_skipped: 0,
        }
    );
    assert!(!blocker.join("cache/index.json").exists());
}

#[tokio::test]
async fn interactive_session_answers_and_shows_sources() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let pipeline = pipeline(prepared.index, ScriptedModel::new(), 1);

    let input: &[u8] = b"What is a cat?\ny\n\nQUIT\nnever asked\n";
    let mut output = Vec::new();
    run_interactive(&pipeline, input, &mut output).await.unwrap();

    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("Answer: Cats and dogs are mammals."), "got: {}", text);
    assert!(text.contains("Document 1 (kb/a_cats.txt, offset 0, score "), "got: {}", text);
    assert_eq!(pipeline.usage().snapshot().successful_requests, 1);
}

#[tokio::test]
async fn interactive_session_continues_after_a_failed_question() {
    let tmp = TempDir::new().unwrap();
    let prepared = prepare(MemoryStore::new(ANIMALS), KeywordEmbedder::new(), &tmp, false)
        .await
        .unwrap();
    let pipeline = pipeline(prepared.index, Arc::new(RateLimitedModel), 2);

    let input: &[u8] = b"What is a cat?\nWhat is a dog?\n";
    let mut output = Vec::new();
    run_interactive(&pipeline, input, &mut output).await.unwrap();

    let text = String::from_utf8(output).unwrap();
    assert_eq!(text.matches("Error:").count(), 2, "got: {}", text);
    assert!(text.contains("rate limited"));
    assert_eq!(pipeline.usage().snapshot().successful_requests, 0);
}
