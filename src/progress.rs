//! Indexing progress reporting.
//!
//! Reports what the ingestion pipeline is doing (listing, downloading,
//! extracting, embedding) so users see how much is left before the question
//! prompt appears. Progress is emitted on **stderr** so stdout stays reserved
//! for answers and summaries.

use std::io::Write;

/// A single progress event emitted by the ingestion pipeline.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Object listing in progress; total unknown.
    Listing { location: String },
    /// Documents downloaded and extracted so far.
    Loading { n: u64, total: u64 },
    /// Chunks embedded so far.
    Embedding { n: u64, total: u64 },
    /// Persisted index reused.
    CacheHit { chunks: u64 },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  loading  12 / 40 documents".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Listing { location } => {
                format!("index  listing {}...\n", location)
            }
            IndexProgressEvent::Loading { n, total } => format!(
                "index  loading  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::CacheHit { chunks } => format!(
                "index  loaded {} chunks from cache\n",
                format_number(*chunks)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Listing { location } => serde_json::json!({
                "event": "progress",
                "phase": "listing",
                "location": location,
            }),
            IndexProgressEvent::Loading { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "n": n,
                "total": total,
            }),
            IndexProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total,
            }),
            IndexProgressEvent::CacheHit { chunks } => serde_json::json!({
                "event": "progress",
                "phase": "cache_hit",
                "chunks": chunks,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

/// Format an integer with `,` thousands separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
