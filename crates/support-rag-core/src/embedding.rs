//! Embedding service boundary, the [`Embedder`] component, and vector utilities.
//!
//! [`EmbeddingService`] is the opaque network capability
//! (`embed(texts, model_version) → vectors | error`). [`Embedder`] wraps a
//! service with the caller-side policy: retry of transient failures,
//! response validation (count, dimension, finiteness), and stamping each
//! vector with its model version.
//!
//! Concrete services (OpenAI, Ollama, offline hashing, fastembed) live in
//! the `support-rag` app crate.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::{Error, Result, ServiceError};
use crate::models::EmbeddingVector;
use crate::retry::{retry, RetryPolicy};

/// External embedding capability.
///
/// Implementations must be pure modulo `model_version`: the same text and
/// model version yield the same vector. They must not retry internally;
/// the [`Embedder`] owns the retry policy.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Short service identifier for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Embed `texts` in order, returning one vector per input.
    async fn embed_texts(
        &self,
        texts: &[String],
        model_version: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError>;
}

/// Maps text to fixed-dimension [`EmbeddingVector`]s.
///
/// Batching is an optimization only: [`embed_batch`](Embedder::embed_batch)
/// returns the same vectors as calling [`embed`](Embedder::embed) on each
/// text.
#[derive(Clone)]
pub struct Embedder {
    service: Arc<dyn EmbeddingService>,
    model_version: String,
    dims: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("service", &self.service.name())
            .field("model_version", &self.model_version)
            .field("dims", &self.dims)
            .finish()
    }
}

impl Embedder {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        model_version: impl Into<String>,
        dims: usize,
    ) -> Self {
        Self {
            service,
            model_version: model_version.into(),
            dims,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Model version tag stamped on every vector.
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Declared vector dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self
            .embed_batch_labeled(&[text.to_string()], "single text")
            .await?;
        vectors.pop().ok_or_else(|| Error::EmbeddingService {
            context: "single text".into(),
            message: "empty embedding response".into(),
            transient: false,
        })
    }

    /// Embed several texts in one service call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        let label = format!("batch of {}", texts.len());
        self.embed_batch_labeled(texts, &label).await
    }

    /// Embed `texts`, naming them `label` in any resulting error.
    #[instrument(skip(self, texts), fields(op = "embed", model = %self.model_version, input_count = texts.len()))]
    pub async fn embed_batch_labeled(
        &self,
        texts: &[String],
        label: &str,
    ) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let raw = retry(&self.retry, "embed", move || async move {
            self.service
                .embed_texts(texts, &self.model_version)
                .await
                .map_err(|e| Error::embedding(label, e))
        })
        .await?;

        if raw.len() != texts.len() {
            return Err(Error::EmbeddingService {
                context: label.to_string(),
                message: format!(
                    "{} returned {} vectors for {} texts",
                    self.service.name(),
                    raw.len(),
                    texts.len()
                ),
                transient: false,
            });
        }

        let now = Utc::now();
        let mut out = Vec::with_capacity(raw.len());
        for vector in raw {
            if vector.len() != self.dims {
                return Err(Error::EmbeddingService {
                    context: label.to_string(),
                    message: format!(
                        "{} returned {} dimensions, expected {}",
                        self.service.name(),
                        vector.len(),
                        self.dims
                    ),
                    transient: false,
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(Error::EmbeddingService {
                    context: label.to_string(),
                    message: "embedding contains non-finite values".into(),
                    transient: false,
                });
            }
            out.push(EmbeddingVector {
                chunk_id: None,
                vector,
                model_version: self.model_version.clone(),
                created_at: now,
            });
        }

        debug!(count = out.len(), "embedded texts");
        Ok(out)
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use support_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`vec_to_blob`]. Trailing partial floats are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length. Returns `None` for zero or non-finite norms.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm < f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Dot product over the common prefix of `a` and `b`.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// This is the reference formula for [`crate::index::VectorIndex`] scores.
/// The index stores unit vectors and scores with [`dot`], which equals this
/// value for the raw vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
