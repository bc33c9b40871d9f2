//! Index maintenance commands: `srag index`, `srag reembed`, `srag delete`.

use std::path::Path;

use anyhow::{bail, Result};
use support_rag_core::build::{BuildReport, IndexBuilder};
use support_rag_core::chunk::Chunker;

use crate::config::Config;
use crate::documents;
use crate::embedding;
use crate::index_store;

fn builder(config: &Config) -> Result<IndexBuilder> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let embedder = embedding::create_embedder(&config.embedding)?;
    let index = index_store::load_or_create(&config.index.path, embedder.dims())?;
    Ok(IndexBuilder::new(Chunker::new(config.chunking.to_core()), embedder, index)?
        .with_batch_size(config.embedding.batch_size)
        .with_concurrency(config.embedding.concurrency))
}

/// Chunk, embed and index every document in `documents_path`.
pub async fn run_index(config: &Config, documents_path: &Path, dry_run: bool) -> Result<()> {
    let docs = documents::load_documents(documents_path)?;
    let builder = builder(config)?;

    if dry_run {
        let report = builder.plan(&docs);
        println!("index (dry-run)");
        println!("  documents: {}", report.documents);
        println!("  chunks: {}", report.chunks);
        println!("  to embed: {}", report.embedded);
        println!("  unchanged: {}", report.unchanged);
        print_errors(&report);
        return Ok(());
    }

    let report = builder.build(&docs).await;
    index_store::save_index(builder.index(), &config.index.path)?;

    println!("index");
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed: {}", report.removed);
    println!("  failed: {}", report.failed);
    println!("  total entries: {}", builder.index().len());
    print_errors(&report);
    Ok(())
}

/// Re-embed entries whose model version differs from the configured one.
pub async fn run_reembed(config: &Config) -> Result<()> {
    if !config.index.path.exists() {
        bail!(
            "No index at {}. Run `srag index` first.",
            config.index.path.display()
        );
    }
    let builder = builder(config)?;
    let report = builder.reembed_stale().await;
    if report.chunks == 0 {
        println!("reembed");
        println!("  all entries up to date");
        return Ok(());
    }
    index_store::save_index(builder.index(), &config.index.path)?;

    println!("reembed");
    println!("  stale entries: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    print_errors(&report);
    Ok(())
}

/// Remove every entry of one document.
pub fn run_delete(config: &Config, document_id: &str) -> Result<()> {
    let index = index_store::load_index(&config.index.path)?;
    let removed = index.delete_document(document_id);
    if removed == 0 {
        println!("No entries found for document {}.", document_id);
        return Ok(());
    }
    index_store::save_index(&index, &config.index.path)?;
    println!("Deleted {} entries for document {}.", removed, document_id);
    Ok(())
}

fn print_errors(report: &BuildReport) {
    for e in &report.errors {
        eprintln!("Warning: {}: {}", e.context, e.message);
    }
}
