//! # support-rag
//!
//! Retrieval-augmented support insights from customer tickets and notes.
//!
//! The retrieval-and-assembly pipeline lives in [`support_rag_core`]; this
//! crate wires it to the outside world: TOML configuration, concrete
//! embedding and generation services, document loading, on-disk index
//! persistence and the `srag` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Documents  │──▶│ Chunk+Embed  │──▶│ VectorIndex │──▶ index.json
//! │ JSON/JSONL │   │ (batched)    │   │ (in memory) │
//! └────────────┘   └──────────────┘   └──────┬──────┘
//!                                            │
//!          query ─▶ Retriever ─▶ ContextAssembler ─▶ InsightGenerator ─▶ Insight JSON
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! srag index tickets.jsonl                 # chunk, embed, persist
//! srag search "refund issue" --customer C-1
//! srag ask "refund issue" --customer C-1   # full insight
//! srag stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`documents`] | JSON / JSONL document loading |
//! | [`embedding`] | Embedding services (hashing, OpenAI, Ollama, fastembed) |
//! | [`generation`] | Generative model services (OpenAI, Ollama) |
//! | [`index_store`] | Index persistence |
//! | [`index_cmd`] | `index`, `reembed`, `delete` commands |
//! | [`search`] | `search` command |
//! | [`ask`] | `ask` command |
//! | [`stats`] | `stats` command |

pub mod ask;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod index_cmd;
pub mod index_store;
pub mod search;
pub mod stats;
