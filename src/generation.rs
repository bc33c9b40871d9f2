//! Concrete generative model services.
//!
//! Both implement [`CompletionModel`] with a single attempt per call.
//! The core [`InsightGenerator`] owns retry, validation and repair.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use support_rag_core::insight::{CompletionModel, InsightGenerator};
use support_rag_core::ServiceError;

use crate::config::GenerationConfig;
use crate::http;

/// OpenAI chat completions in JSON mode. Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f32,
}

impl OpenAIChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        Ok(Self {
            client: http::client(config.timeout())?,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAIChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        _response_schema: &Value,
    ) -> std::result::Result<String, ServiceError> {
        // The schema is already embedded in the prompt; JSON mode enforces
        // syntax, the core validator enforces shape.
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let response = http::send_json(request, "OpenAI").await?;
        response
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::permanent("Invalid OpenAI response: missing message content"))
    }
}

/// Ollama `/api/chat` with the response schema passed as `format`.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            client: http::client(config.timeout())?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        response_schema: &Value,
    ) -> std::result::Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "format": response_schema,
            "options": { "temperature": self.temperature },
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);
        let response = http::send_json(request, "Ollama").await?;
        response
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::permanent("Invalid Ollama response: missing message content"))
    }
}

/// Build the configured [`InsightGenerator`].
pub fn create_generator(config: &GenerationConfig) -> Result<InsightGenerator> {
    let model: Arc<dyn CompletionModel> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAIChat::new(config)?),
        "ollama" => Arc::new(OllamaChat::new(config)?),
        "disabled" => bail!("Generation provider is disabled. Set [generation] provider in config."),
        other => bail!("Unknown generation provider: {}", other),
    };
    Ok(InsightGenerator::new(model).with_retry_policy(config.retry_policy()))
}
