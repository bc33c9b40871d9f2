//! Document input: a JSON array or JSON Lines of
//! `{id, source_type, text, created_at, customer_id}`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use support_rag_core::models::Document;

pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
    parse_documents(&content).with_context(|| format!("Invalid documents file: {}", path.display()))
}

pub fn parse_documents(content: &str) -> Result<Vec<Document>> {
    let documents: Vec<Document> = if content.trim_start().starts_with('[') {
        serde_json::from_str(content).context("Failed to parse JSON array of documents")?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut seen = HashSet::new();
    for doc in &documents {
        if doc.id.trim().is_empty() {
            bail!("document with empty id");
        }
        if doc.customer_id.trim().is_empty() {
            bail!("document {} has an empty customer_id", doc.id);
        }
        if !seen.insert(doc.id.as_str()) {
            bail!("duplicate document id: {}", doc.id);
        }
    }
    Ok(documents)
}
