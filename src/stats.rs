//! Index statistics and health overview.
//!
//! A quick summary of what's indexed: entry, document and customer
//! counts, plus the model versions in use. More than one model version
//! means some entries are stale and `srag reembed` is due.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::index_store;

pub fn run_stats(config: &Config, json: bool) -> Result<()> {
    let path = &config.index.path;
    if !path.exists() {
        bail!("No index at {}. Run `srag index` first.", path.display());
    }
    let index = index_store::load_index(path)?;
    let stats = index.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("support-rag: Index Stats");
    println!("=========================");
    println!();
    println!("  Index:       {}", path.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Dimensions:  {}", stats.dims);
    println!();
    println!("  Entries:     {}", stats.entries);
    println!("  Documents:   {}", stats.documents);
    println!("  Customers:   {}", stats.customers);
    println!();
    println!("  Model versions:");
    for (version, count) in &stats.model_versions {
        println!("    {:<32} {}", version, count);
    }
    if stats.model_versions.len() > 1 {
        println!();
        println!("  Multiple model versions present; run `srag reembed`.");
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
