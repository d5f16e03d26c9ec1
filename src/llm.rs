//! Language model capability and provider clients.
//!
//! Providers are selected by `model.provider`:
//!
//! | Provider | Client | Endpoint | Key |
//! |----------|--------|----------|-----|
//! | `openai` | [`OpenAiCompatibleChat`] | `https://api.openai.com/v1/chat/completions` | `OPENAI_API_KEY` |
//! | `deepseek` | [`OpenAiCompatibleChat`] | `https://api.deepseek.com/chat/completions` | `DEEPSEEK_API_KEY` |
//! | `ollama` | [`OllamaChat`] | `http://localhost:11434/api/chat` | none |
//!
//! `model.api_key` and `model.api_base` override the defaults. Calls are not
//! retried: every failure surfaces as a [`ModelInvocationError`] and the
//! caller decides what to do with it.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::ModelInvocationError;
use crate::pricing::PricingTable;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Estimated cost in USD.
    pub cost: f64,
}

/// A chat-style language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest)
        -> Result<Completion, ModelInvocationError>;
}

struct ProviderPreset {
    base_url: &'static str,
    key_env: &'static str,
}

fn preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "openai" => Some(ProviderPreset {
            base_url: "https://api.openai.com/v1",
            key_env: "OPENAI_API_KEY",
        }),
        "deepseek" => Some(ProviderPreset {
            base_url: "https://api.deepseek.com",
            key_env: "DEEPSEEK_API_KEY",
        }),
        _ => None,
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatibleChat {
    http: reqwest::Client,
    provider: String,
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    pricing: PricingTable,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &ModelConfig, pricing: PricingTable) -> Result<Self> {
        let preset = match preset(&config.provider) {
            Some(p) => p,
            None => bail!("Unsupported provider: {}", config.provider),
        };

        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(preset.key_env).ok().filter(|k| !k.is_empty()));
        let api_key = match api_key {
            Some(key) => key,
            None => bail!("API key not found for provider {}", config.provider),
        };

        Ok(Self {
            http: build_client(config.timeout_secs)?,
            provider: config.provider.clone(),
            model: config.model.clone(),
            api_key,
            base_url: config
                .api_base
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| preset.base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: config.timeout_secs,
            pricing,
        })
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, ModelInvocationError> {
        let payload = json!({
            "model": self.model,
            "messages": messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = read_success_body(&self.provider, response, self.timeout_secs).await?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ModelInvocationError::InvalidResponse {
                provider: self.provider.clone(),
                reason: e.to_string(),
            })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelInvocationError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "missing choices[0].message.content".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        let prompt_tokens = usage.prompt_tokens.unwrap_or(0);
        let completion_tokens = usage.completion_tokens.unwrap_or(0);

        Ok(Completion {
            text,
            prompt_tokens,
            completion_tokens,
            cost: self
                .pricing
                .cost(&self.provider, &self.model, prompt_tokens, completion_tokens),
        })
    }
}

impl OpenAiCompatibleChat {
    fn transport_error(&self, err: reqwest::Error) -> ModelInvocationError {
        map_transport_error(&self.provider, self.timeout_secs, err)
    }
}

/// Client for a local Ollama server (`/api/chat`). Local calls cost nothing.
pub struct OllamaChat {
    http: reqwest::Client,
    model: String,
    url: String,
    timeout_secs: u64,
}

impl OllamaChat {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            http: build_client(config.timeout_secs)?,
            model: config.model.clone(),
            url: config
                .api_base
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, ModelInvocationError> {
        let payload = json!({
            "model": self.model,
            "messages": messages(request),
            "stream": false,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": request.temperature,
            },
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_transport_error("ollama", self.timeout_secs, e))?;

        let body = read_success_body("ollama", response, self.timeout_secs).await?;
        let parsed: OllamaChatResponse =
            serde_json::from_str(&body).map_err(|e| ModelInvocationError::InvalidResponse {
                provider: "ollama".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Completion {
            text: parsed.message.content,
            prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
            completion_tokens: parsed.eval_count.unwrap_or(0),
            cost: 0.0,
        })
    }
}

/// Construct the [`ChatModel`] named by `model.provider`.
///
/// Fails for unknown providers and for hosted providers without an API key.
pub fn create_chat_model(config: &ModelConfig, pricing: PricingTable) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" | "deepseek" => Ok(Arc::new(OpenAiCompatibleChat::new(config, pricing)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unsupported provider: {}", other),
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.user }));
    messages
}

fn map_transport_error(provider: &str, timeout_secs: u64, err: reqwest::Error) -> ModelInvocationError {
    if err.is_timeout() {
        ModelInvocationError::Timeout {
            provider: provider.to_string(),
            secs: timeout_secs,
        }
    } else {
        ModelInvocationError::Transport {
            provider: provider.to_string(),
            reason: err.to_string(),
        }
    }
}

async fn read_success_body(
    provider: &str,
    response: reqwest::Response,
    timeout_secs: u64,
) -> Result<String, ModelInvocationError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_transport_error(provider, timeout_secs, e))?;

    if !status.is_success() {
        return Err(ModelInvocationError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}
