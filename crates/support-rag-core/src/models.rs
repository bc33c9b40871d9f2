//! Data model shared by every stage of the pipeline.
//!
//! Build time produces [`Document`] → [`Chunk`] → [`EmbeddingVector`] →
//! [`IndexEntry`]. Query time produces [`RetrievedCandidate`] →
//! [`AssembledContext`] → [`Insight`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where a customer record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Ticket,
    Note,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ticket => "ticket",
            SourceType::Note => "note",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticket" => Ok(SourceType::Ticket),
            "note" => Ok(SourceType::Note),
            other => Err(format!("unknown source type '{}': use ticket or note", other)),
        }
    }
}

/// A raw customer record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable, unique identifier supplied by ingestion.
    pub id: String,
    pub source_type: SourceType,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub customer_id: String,
}

/// A retrievable unit of a document's text.
///
/// `start`/`end` are byte offsets into the document's normalized text;
/// `overlap` is the number of leading bytes shared with the previous
/// chunk (0 for the first chunk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUIDv5 of `(document_id, position)`.
    pub id: String,
    pub document_id: String,
    pub position: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
    pub token_count: usize,
    /// SHA-256 of `text`, for staleness detection.
    pub hash: String,
}

/// A vector produced by the embedder for one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// Set when the vector belongs to a chunk; `None` for query vectors.
    pub chunk_id: Option<String>,
    pub vector: Vec<f32>,
    /// Vectors are only comparable within one model version.
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingVector {
    pub fn dims(&self) -> usize {
        self.vector.len()
    }

    /// Attach the vector to a chunk.
    pub fn for_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }
}

/// Metadata snapshot stored alongside each indexed vector.
///
/// Carries the full chunk so candidates can be rebuilt without a
/// separate document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub chunk: Chunk,
    pub customer_id: String,
    pub source_type: SourceType,
    /// `created_at` of the parent document, used as the recency tie-break.
    pub created_at: DateTime<Utc>,
}

/// One vector-index record.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    /// Unit-length after insertion into the index.
    pub vector: Vec<f32>,
    pub model_version: String,
    pub embedded_at: DateTime<Utc>,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    /// Build an entry for `chunk` of `document` from its embedding.
    pub fn new(document: &Document, chunk: Chunk, embedding: EmbeddingVector) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector: embedding.vector,
            model_version: embedding.model_version,
            embedded_at: embedding.created_at,
            metadata: EntryMetadata {
                chunk,
                customer_id: document.customer_id.clone(),
                source_type: document.source_type,
                created_at: document.created_at,
            },
        }
    }
}

/// A ranked retrieval result. Ephemeral, produced per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedCandidate {
    pub chunk: Chunk,
    pub customer_id: String,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity_score: f32,
    /// One-based position in the retriever's ordering.
    pub rank: usize,
}

/// Token-bounded prompt context. Ephemeral, produced per query.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AssembledContext {
    /// Included candidates, in retrieval rank order.
    pub chunks: Vec<RetrievedCandidate>,
    pub total_token_count: usize,
    /// True iff at least one candidate was dropped for budget reasons.
    pub truncated: bool,
    /// Candidates skipped as near-duplicates of an included chunk.
    pub deduplicated: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Customer sentiment classification emitted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Frustrated,
    Neutral,
    Satisfied,
    Angry,
    Confused,
    Anxious,
}

impl Sentiment {
    pub const ALL: [Sentiment; 6] = [
        Sentiment::Frustrated,
        Sentiment::Neutral,
        Sentiment::Satisfied,
        Sentiment::Angry,
        Sentiment::Confused,
        Sentiment::Anxious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Frustrated => "frustrated",
            Sentiment::Neutral => "neutral",
            Sentiment::Satisfied => "satisfied",
            Sentiment::Angry => "angry",
            Sentiment::Confused => "confused",
            Sentiment::Anxious => "anxious",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    /// Case-insensitive, whitespace-trimmed match against the enumerated values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Sentiment::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == wanted)
            .ok_or_else(|| format!("invalid customer_sentiment '{}'", s))
    }
}

/// Structured support insight. Field names are part of the output contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Insight {
    /// One or two sentences describing the customer's problem.
    pub issue_summary: String,
    pub customer_sentiment: Sentiment,
    /// Reply an agent could send to the customer.
    pub draft_reply: String,
    /// Ordered next steps for the support agent.
    pub recommended_actions: Vec<String>,
}

/// Per-query inputs the generator needs besides the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMetadata {
    pub query_text: String,
    pub customer_id: String,
}
