//! # llkms CLI
//!
//! The `llkms` binary indexes documents from object storage and answers
//! questions about them.
//!
//! ## Usage
//!
//! ```bash
//! llkms --config ./config.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `llkms chat` | Build or load the index, then ask questions interactively (default) |
//! | `llkms ask "<question>"` | Answer one question and exit |
//! | `llkms index` | Build or refresh the index cache only |
//!
//! Every command prints nothing but answers and summaries on stdout; progress
//! and warnings go to stderr, and a debug log is written to `logs/llkms.log`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use llkms::config::{self, Config};
use llkms::embedding::{create_embedder, Embedder};
use llkms::index::IndexCache;
use llkms::ingest::{IndexOrigin, IndexSettings, Indexer, PreparedIndex};
use llkms::interactive::{describe_error, run_interactive, write_sources};
use llkms::llm::create_chat_model;
use llkms::loader::DocumentLoader;
use llkms::logging;
use llkms::ocr::create_ocr;
use llkms::pipeline::{PipelineSettings, QueryPipeline};
use llkms::pricing::PricingTable;
use llkms::progress::{format_number, ProgressMode};
use llkms::traits::create_store;
use llkms::usage::UsageTracker;

/// llkms: ask questions about the documents in your bucket.
#[derive(Parser)]
#[command(
    name = "llkms",
    about = "Ask questions about documents stored in S3, answered by a language model",
    version,
    long_about = "llkms downloads documents from an S3 bucket (or a local directory), extracts \
    their text (PDF, Word, HTML, plain text, images via OCR), indexes them as embeddings, and \
    answers questions by retrieving the most relevant passages for a language model. The index \
    is cached on disk and rebuilt only when the documents change."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Ignore the index cache and rebuild from the documents.
    #[arg(long, global = true)]
    reindex: bool,

    /// Indexing progress on stderr: human, json, or off.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long, global = true, value_parser = ["human", "json", "off"])]
    progress: Option<String>,

    /// Log debug output to stderr as well as the log file.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive question loop. Type `quit` to leave.
    Chat,

    /// Answer a single question.
    Ask {
        /// The question to answer.
        question: String,

        /// Print the retrieved passages after the answer.
        #[arg(long)]
        show_sources: bool,
    },

    /// Build or refresh the index cache without asking anything.
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    logging::init(&config.logging, cli.verbose)?;
    tracing::debug!(config = %cli.config.display(), "loaded configuration");

    let progress = cli
        .progress
        .as_deref()
        .and_then(ProgressMode::parse)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Index => {
            let embedder = create_embedder(&config.embedding)?;
            let prepared = prepare_index(&config, embedder, cli.reindex, progress).await?;
            println!("index {}", config.cache.path.display());
            println!("  documents: {}", format_number(prepared.documents as u64));
            println!("  chunks: {}", format_number(prepared.index.len() as u64));
            match prepared.origin {
                IndexOrigin::Cache => println!("  source: cache"),
                IndexOrigin::Built {
                    documents_loaded,
                    documents_skipped,
                } => println!(
                    "  source: built ({} loaded, {} skipped)",
                    documents_loaded, documents_skipped
                ),
            }
            println!("ok");
        }
        Commands::Ask {
            question,
            show_sources,
        } => {
            let pipeline = build_pipeline(&config, cli.reindex, progress).await?;
            let outcome = pipeline.answer(&question).await;
            let mut stdout = std::io::stdout().lock();
            let failed = match outcome {
                Ok(answer) => {
                    writeln!(stdout, "{}", answer.text)?;
                    if show_sources {
                        write_sources(&mut stdout, &answer)?;
                    }
                    false
                }
                Err(e) => {
                    eprintln!("Error: {}", describe_error(&e));
                    true
                }
            };
            writeln!(stdout, "\n{}", pipeline.usage().snapshot())?;
            stdout.flush()?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Chat => {
            let pipeline = build_pipeline(&config, cli.reindex, progress).await?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            run_interactive(&pipeline, stdin, &mut stdout).await?;
            writeln!(stdout, "\n{}", pipeline.usage().snapshot())?;
        }
    }

    Ok(())
}

fn indexer(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Indexer> {
    Ok(Indexer {
        store: create_store(&config.storage)?,
        loader: DocumentLoader::new(create_ocr(&config.ocr)?, config.loading.workers),
        embedder,
        cache: IndexCache::new(&config.cache.path),
    })
}

async fn prepare_index(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    reindex: bool,
    progress: ProgressMode,
) -> Result<PreparedIndex> {
    let indexer = indexer(config, embedder)?;
    let settings = IndexSettings::from_config(config, reindex);
    let reporter = progress.reporter();
    indexer.prepare(&settings, reporter.as_ref()).await
}

async fn build_pipeline(config: &Config, reindex: bool, progress: ProgressMode) -> Result<QueryPipeline> {
    // Construct the model first so a missing API key fails before indexing.
    let model = create_chat_model(&config.model, PricingTable::with_overrides(&config.pricing))?;
    let embedder = create_embedder(&config.embedding)?;
    let prepared = prepare_index(config, Arc::clone(&embedder), reindex, progress).await?;

    Ok(QueryPipeline::new(
        Arc::new(prepared.index),
        embedder,
        model,
        Arc::new(UsageTracker::new()),
        PipelineSettings::from_config(config),
    ))
}
