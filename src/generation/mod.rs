//! Chat-completion providers used to generate grounded answers.
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledGenerator`] | none |
//! | `"openai"` | [`OpenAICompatibleGenerator`] | `POST {url}/chat/completions` (Groq by default) |
//! | `"ollama"` | [`OllamaGenerator`] | `POST {url}/api/chat` |
//!
//! Like the embedding providers, a generator makes exactly one request per
//! call; retries are applied by [`AnswerGenerator`](crate::answer::AnswerGenerator).

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{KbError, Result};
use crate::provider::{api_key_from_env, http_client, post_json, ProviderError};

/// A system message plus the user's question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    fn messages(&self) -> serde_json::Value {
        serde_json::json!([
            { "role": "system", "content": self.system },
            { "role": "user", "content": self.user },
        ])
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, ProviderError>;
}

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &Prompt) -> std::result::Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// Any OpenAI-compatible chat API (OpenAI, Groq, vLLM, ...).
pub struct OpenAICompatibleGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl OpenAICompatibleGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string());
        let client = http_client(config.timeout())
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_answer_tokens,
            client,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAICompatibleGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = post_json(
            &self.client,
            "Chat",
            &format!("{}/chat/completions", self.url),
            Some(&self.api_key),
            &body,
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> std::result::Result<String, ProviderError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
}

/// Chat via a local Ollama instance.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = http_client(config.timeout())
            .map_err(|e| KbError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_answer_tokens,
            client,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing message.content".into()))
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAICompatibleGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => Err(KbError::InvalidConfiguration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}
