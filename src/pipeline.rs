//! Retrieval-augmented question answering.
//!
//! For each question the pipeline retrieves the top-K chunks from the
//! [`VectorIndex`], packs them into a prompt that stays within the configured
//! token budget, calls the [`ChatModel`] once, and records the call's usage.
//!
//! ```text
//! question ─▶ embed ─▶ top-K chunks ─▶ bounded prompt ─▶ model ─▶ answer
//!                                                          │
//!                                                          ▼
//!                                                    UsageTracker
//! ```

use std::sync::Arc;

use crate::chunk::{estimate_tokens, CHARS_PER_TOKEN};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::QueryError;
use crate::index::VectorIndex;
use crate::llm::{ChatModel, CompletionRequest};
use crate::models::RetrievedChunk;
use crate::usage::UsageTracker;

/// Fixed instruction sent with every question.
pub const SYSTEM_INSTRUCTION: &str = "Answer the question based on the following context. \
If you don't know the answer, just say you don't know. Use three sentences maximum. \
If the context is not enough to answer the question, say so and if you know the answer \
start message with 'Not enough context, but...'";

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    /// Upper bound on the estimated prompt size (system + user), in tokens.
    pub max_prompt_tokens: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_prompt_tokens: config.retrieval.max_prompt_tokens,
            max_tokens: config.model.max_tokens,
            temperature: config.model.temperature,
        }
    }
}

/// A model answer and what it was based on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Retrieved chunks in score order.
    pub sources: Vec<RetrievedChunk>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn estimated_tokens(&self) -> usize {
        (self.system.chars().count() + self.user.chars().count()).div_ceil(CHARS_PER_TOKEN)
    }
}

/// Assemble the prompt for `question` from `chunks` (score order).
///
/// Chunks are added until the budget runs out; the first chunk that does not
/// fit is truncated to the remaining space and later chunks are dropped. The
/// instruction and the question are always included in full.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk], max_prompt_tokens: usize) -> Prompt {
    let system = SYSTEM_INSTRUCTION.to_string();
    let scaffold = user_message("", question);

    let budget = max_prompt_tokens.saturating_mul(CHARS_PER_TOKEN);
    let fixed = system.chars().count() + scaffold.chars().count();
    let mut remaining = budget.saturating_sub(fixed);
    if fixed > budget {
        tracing::warn!(
            estimated_tokens = estimate_tokens(&system) + estimate_tokens(&scaffold),
            max_prompt_tokens,
            "question alone exceeds the prompt budget; sending without context"
        );
    }

    let mut context = String::new();
    for retrieved in chunks {
        let separator = if context.is_empty() { 0 } else { CONTEXT_SEPARATOR.len() };
        if remaining <= separator {
            break;
        }
        let text = retrieved.chunk.text.trim();
        let available = remaining - separator;
        let length = text.chars().count();

        if separator > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        if length <= available {
            context.push_str(text);
            remaining = available - length;
        } else {
            context.extend(text.chars().take(available));
            break;
        }
    }

    Prompt {
        system,
        user: user_message(&context, question),
    }
}

fn user_message(context: &str, question: &str) -> String {
    format!("Context: {}\n\nQuestion: {}\n\nAnswer:", context, question)
}

/// Answers questions against a prepared index.
pub struct QueryPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    usage: Arc<UsageTracker>,
    settings: PipelineSettings,
}

impl QueryPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        usage: Arc<UsageTracker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            usage,
            settings,
        }
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Answer one question. Usage is recorded only when the model call succeeds.
    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let sources = self
            .index
            .search(self.embedder.as_ref(), question, self.settings.top_k)
            .await
            .map_err(|e| QueryError::Embedding(format!("{:#}", e)))?;

        let prompt = build_prompt(question, &sources, self.settings.max_prompt_tokens);
        tracing::debug!(
            retrieved = sources.len(),
            estimated_tokens = prompt.estimated_tokens(),
            "built prompt"
        );

        let request = CompletionRequest {
            system: Some(prompt.system),
            user: prompt.user,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let completion = match self.model.complete(&request).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(
                    provider = self.model.provider(),
                    model = self.model.model_name(),
                    error = %e,
                    "model call failed"
                );
                return Err(e.into());
            }
        };

        self.usage.record(
            completion.prompt_tokens,
            completion.completion_tokens,
            completion.cost,
        );
        tracing::info!(
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            cost = completion.cost,
            "model call succeeded"
        );

        Ok(Answer {
            text: completion.text.trim().to_string(),
            sources,
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            cost: completion.cost,
        })
    }
}
