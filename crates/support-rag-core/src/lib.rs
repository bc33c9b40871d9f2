//! # support-rag core
//!
//! Retrieval-and-assembly pipeline for customer-support history: data
//! models, chunking, the embedder component, an in-memory vector index,
//! retrieval, token-bounded context assembly, and structured insight
//! generation with validation and a single repair attempt.
//!
//! This crate performs no HTTP or filesystem I/O. Network-bound
//! collaborators enter through two traits:
//!
//! - [`embedding::EmbeddingService`]: `embed(texts, model_version)`
//! - [`insight::CompletionModel`]: `complete(prompt, response_schema)`
//!
//! Concrete services (OpenAI, Ollama, offline hashing) live in the
//! `support-rag` app crate.
//!
//! ## Data Flow
//!
//! ```text
//! build:  Document ─▶ Chunker ─▶ Embedder ─▶ VectorIndex
//! query:  text ─▶ Embedder ─▶ Retriever ─▶ ContextAssembler ─▶ InsightGenerator ─▶ Insight
//! ```

pub mod assemble;
pub mod build;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod insight;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod retry;

pub use error::{Error, Result, ServiceError};
