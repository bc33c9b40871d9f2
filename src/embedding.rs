//! Concrete embedding services.
//!
//! Each implements [`EmbeddingService`] and makes exactly one attempt per
//! call; retry and response validation belong to the core [`Embedder`].
//!
//! | Config value | Service |
//! |--------------|---------|
//! | `"hashing"` | [`HashingService`], offline feature hashing |
//! | `"openai"` | [`OpenAIService`], `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaService`], `POST /api/embed` |
//! | `"local"` | `FastembedService` (feature `local-embeddings-fastembed`) |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use support_rag_core::embedding::{Embedder, EmbeddingService};
use support_rag_core::ServiceError;

use crate::config::EmbeddingConfig;
use crate::http;

// ============ Hashing Service ============

/// Deterministic, offline embedding by signed feature hashing of
/// lowercased word unigrams.
///
/// Texts sharing vocabulary land close together, which is enough for
/// demos, smoke tests and CI without a model server.
pub struct HashingService {
    dims: usize,
}

impl HashingService {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// Model version tag; vectors are only comparable at equal `dims`.
    pub fn model_version(dims: usize) -> String {
        format!("hashing-{}d", dims)
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let mut words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        // Punctuation-only text still needs a non-zero vector.
        if words.is_empty() {
            words.push(lowered.trim());
        }
        for word in words {
            let digest = Sha256::digest(word.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }
        v
    }
}

#[async_trait]
impl EmbeddingService for HashingService {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        _model_version: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI Service ============

/// Calls the OpenAI embeddings API. Requires `OPENAI_API_KEY`.
pub struct OpenAIService {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl OpenAIService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client: http::client(config.timeout())?,
            api_key,
            url,
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAIService {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        model_version: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let request = self
            .client
            .post(format!("{}/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": model_version, "input": texts }));
        let body = http::send_json(request, "OpenAI").await?;
        parse_openai_response(&body)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ServiceError::permanent("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ServiceError::permanent("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, number_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Service ============

/// Calls a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaService {
    client: reqwest::Client,
    url: String,
}

impl OllamaService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http::client(config.timeout())?,
            url,
        })
    }
}

#[async_trait]
impl EmbeddingService for OllamaService {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        model_version: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&json!({ "model": model_version, "input": texts }));
        let body = http::send_json(request, "Ollama").await?;
        parse_ollama_response(&body)
    }
}

fn parse_ollama_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ServiceError::permanent("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|embedding| number_array(embedding, "Ollama"))
        .collect()
}

fn number_array(value: &Value, service: &str) -> std::result::Result<Vec<f32>, ServiceError> {
    value
        .as_array()
        .ok_or_else(|| {
            ServiceError::permanent(format!("Invalid {} response: embedding is not an array", service))
        })?
        .iter()
        .map(|n| {
            n.as_f64().map(|f| f as f32).ok_or_else(|| {
                ServiceError::permanent(format!("Invalid {} response: non-numeric value", service))
            })
        })
        .collect()
}

// ============ Local Service (fastembed) ============

/// Runs an ONNX model in-process. The model downloads on first use and
/// runs offline afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedService {
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedService {
    pub fn new(model_name: &str) -> Result<Self> {
        let model = match model_name {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingService for FastembedService {
    fn name(&self) -> &str {
        "local"
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        _model_version: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            model
                .embed(texts, None)
                .map_err(|e| ServiceError::permanent(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ServiceError::permanent(format!("Local embedding task failed: {}", e)))?
    }
}

/// Build the configured [`Embedder`].
///
/// # Errors
///
/// Fails for the `disabled` provider, for missing credentials, or when
/// `local` is requested without the `local-embeddings-fastembed` feature.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Embedder> {
    let dims = config.dims.unwrap_or(0);
    let model = config.model.clone().unwrap_or_default();
    let (service, model_version): (Arc<dyn EmbeddingService>, String) =
        match config.provider.as_str() {
            "disabled" => bail!("Embedding provider is disabled. Set [embedding] provider in config."),
            "hashing" => (
                Arc::new(HashingService::new(dims)),
                HashingService::model_version(dims),
            ),
            "openai" => (Arc::new(OpenAIService::new(config)?), model),
            "ollama" => (Arc::new(OllamaService::new(config)?), model),
            #[cfg(feature = "local-embeddings-fastembed")]
            "local" => (Arc::new(FastembedService::new(&model)?), model),
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "local" => bail!(
                "Local embedding provider requires --features local-embeddings-fastembed"
            ),
            other => bail!("Unknown embedding provider: {}", other),
        };
    Ok(Embedder::new(service, model_version, dims).with_retry_policy(config.retry_policy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use support_rag_core::embedding::cosine_similarity;

    #[test]
    fn test_hashing_is_deterministic_and_topical() {
        let service = HashingService::new(256);
        let a = service.embed_one("Refund the duplicate charge");
        let b = service.embed_one("refund the DUPLICATE charge!");
        assert_eq!(a, b);

        let related = service.embed_one("customer wants a refund for a duplicate charge");
        let unrelated = service.embed_one("password reset link expired");
        assert!(cosine_similarity(&a, &related) > cosine_similarity(&a, &unrelated));
    }

    #[test]
    fn test_hashing_never_zero() {
        let service = HashingService::new(16);
        assert!(service.embed_one("!!!").iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        assert!(parse_openai_response(&json!({ "error": "x" })).is_err());
        assert!(parse_ollama_response(&json!({ "embeddings": [[1.0, "a"]] })).is_err());
        let ok = parse_ollama_response(&json!({ "embeddings": [[0.5, 0.25]] })).unwrap();
        assert_eq!(ok, vec![vec![0.5, 0.25]]);
    }

    #[tokio::test]
    async fn test_create_hashing_embedder() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            dims: Some(64),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 64);
        assert_eq!(embedder.model_version(), "hashing-64d");
        let v = embedder.embed("refund").await.unwrap();
        assert_eq!(v.dims(), 64);

        assert!(create_embedder(&EmbeddingConfig::default()).is_err());
    }
}
