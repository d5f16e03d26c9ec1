//! # llkms
//!
//! A knowledge management tool that answers questions over documents kept in
//! object storage.
//!
//! llkms pulls files from an S3 bucket (or a local directory), extracts their
//! text (PDF, Word, HTML, plain text, and images via OCR), splits the text into
//! overlapping chunks, embeds them into a vector index, and answers questions
//! by retrieving the most relevant chunks and handing them to a language
//! model. Token usage and estimated cost are tracked for the whole session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ ObjectStore │──▶│   Loader    │──▶│   Chunker    │
//! │  S3/Local   │   │ PDF/OCR/... │   │ size+overlap │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            ▼
//!                   ┌─────────────┐   ┌──────────────┐
//!                   │ IndexCache  │◀─▶│ VectorIndex  │
//!                   │ fingerprint │   │   cosine     │
//!                   └─────────────┘   └──────┬───────┘
//!                                            ▼
//!                   ┌─────────────┐   ┌──────────────┐
//!                   │UsageTracker │◀──│QueryPipeline │──▶ ChatModel
//!                   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! llkms index                          # build or refresh the index cache
//! llkms ask "What is a mammal?"        # one question
//! llkms chat                           # interactive session
//! llkms --reindex chat                 # ignore the cache
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`traits`] | Object storage capability |
//! | [`connector_s3`] | Amazon S3 object store |
//! | [`connector_fs`] | Local directory object store |
//! | [`extract`] | PDF, DOCX and HTML text extraction |
//! | [`ocr`] | OCR capability (tesseract) |
//! | [`loader`] | Format dispatch and concurrent loading |
//! | [`chunk`] | Overlapping text chunker |
//! | [`fingerprint`] | Document set fingerprint |
//! | [`embedding`] | Embedding capability and providers |
//! | [`index`] | Vector index and its on-disk cache |
//! | [`ingest`] | Indexing orchestration |
//! | [`llm`] | Language model capability and providers |
//! | [`pricing`] | Per-model token prices |
//! | [`usage`] | Session usage and cost tracking |
//! | [`pipeline`] | Retrieval-augmented question answering |
//! | [`interactive`] | Interactive question loop |
//! | [`progress`] | Indexing progress on stderr |
//! | [`logging`] | Tracing setup |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_s3;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod ingest;
pub mod interactive;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod pricing;
pub mod progress;
pub mod traits;
pub mod usage;
