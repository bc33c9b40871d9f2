//! `srag search`: retrieval only, no generation.

use anyhow::{bail, Result};
use support_rag_core::models::RetrievedCandidate;
use support_rag_core::retrieve::Retriever;

use crate::config::Config;
use crate::embedding;
use crate::index_store;

/// Open a [`Retriever`] over the persisted index.
pub fn open_retriever(config: &Config) -> Result<Retriever> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    if !config.index.path.exists() {
        bail!(
            "No index at {}. Run `srag index` first.",
            config.index.path.display()
        );
    }
    let embedder = embedding::create_embedder(&config.embedding)?;
    let index = index_store::load_or_create(&config.index.path, embedder.dims())?;
    Ok(Retriever::new(embedder, index))
}

pub async fn run_search(
    config: &Config,
    query: &str,
    customer_id: &str,
    k: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let retriever = open_retriever(config)?;
    let mut params = config.retrieval.to_core();
    if let Some(k) = k {
        params.k = k;
    }
    if let Some(min_score) = min_score {
        params.min_score = min_score;
    }

    let candidates = retriever.retrieve(query, customer_id, &params).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }
    if candidates.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for c in &candidates {
        print_candidate(c);
    }
    Ok(())
}

fn print_candidate(c: &RetrievedCandidate) {
    println!(
        "{}. [{:.3}] {} {} (created {}, chunk {})",
        c.rank,
        c.similarity_score,
        c.source_type,
        c.chunk.document_id,
        c.created_at.format("%Y-%m-%d"),
        c.chunk.position
    );
    println!("    {}", snippet(&c.chunk.text, 200));
}

/// First `max_chars` characters of `text` on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
