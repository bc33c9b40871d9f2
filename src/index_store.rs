//! On-disk index persistence.
//!
//! The index is stored as one JSON document. Vectors are base64 of their
//! little-endian `f32` bytes so a reload is bit-exact, and because stored
//! vectors are already unit-length they are restored without
//! renormalization: a reloaded index answers every query exactly as the
//! saved one did.
//!
//! Saving writes a sibling temp file and renames it over the target, so a
//! crash never leaves a half-written index behind.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use support_rag_core::embedding::{blob_to_vec, vec_to_blob};
use support_rag_core::index::VectorIndex;
use support_rag_core::models::{EntryMetadata, IndexEntry};
use tracing::{debug, info};
use uuid::Uuid;

pub const FORMAT_VERSION: u32 = 1;

/// Serialized form of a [`VectorIndex`].
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format_version: u32,
    pub dims: usize,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub chunk_id: String,
    pub model_version: String,
    pub embedded_at: DateTime<Utc>,
    /// Base64 of little-endian f32 bytes.
    pub vector: String,
    pub metadata: EntryMetadata,
}

impl IndexSnapshot {
    pub fn capture(index: &VectorIndex) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            dims: index.dims(),
            entries: index
                .entries()
                .iter()
                .map(|e| SnapshotEntry {
                    chunk_id: e.chunk_id.clone(),
                    model_version: e.model_version.clone(),
                    embedded_at: e.embedded_at,
                    vector: STANDARD.encode(vec_to_blob(&e.vector)),
                    metadata: e.metadata.clone(),
                })
                .collect(),
        }
    }

    pub fn restore(self) -> Result<VectorIndex> {
        if self.format_version != FORMAT_VERSION {
            bail!(
                "Unsupported index format version {} (expected {})",
                self.format_version,
                FORMAT_VERSION
            );
        }
        let index = VectorIndex::new(self.dims);
        for entry in self.entries {
            let bytes = STANDARD
                .decode(&entry.vector)
                .with_context(|| format!("chunk {}: vector is not valid base64", entry.chunk_id))?;
            index.restore(IndexEntry {
                chunk_id: entry.chunk_id,
                vector: blob_to_vec(&bytes),
                model_version: entry.model_version,
                embedded_at: entry.embedded_at,
                metadata: entry.metadata,
            })?;
        }
        Ok(index)
    }
}

/// Write `index` to `path` atomically.
pub fn save_index(index: &VectorIndex, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let snapshot = IndexSnapshot::capture(index);
    let json = serde_json::to_vec(&snapshot).context("Failed to serialize index")?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace index: {}", path.display()))?;

    info!(entries = snapshot.entries.len(), path = %path.display(), "index saved");
    Ok(())
}

/// Load the index at `path`.
pub fn load_index(path: &Path) -> Result<VectorIndex> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read index: {}", path.display()))?;
    let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse index: {}", path.display()))?;
    let index = snapshot.restore()?;
    debug!(entries = index.len(), path = %path.display(), "index loaded");
    Ok(index)
}

/// Load the index at `path`, or create an empty one of `dims` dimensions
/// if the file does not exist yet.
pub fn load_or_create(path: &Path, dims: usize) -> Result<Arc<VectorIndex>> {
    if !path.exists() {
        return Ok(Arc::new(VectorIndex::new(dims)));
    }
    let index = load_index(path)?;
    if index.dims() != dims {
        bail!(
            "Index at {} holds {}-dimensional vectors but the embedder produces {}. \
             Point [index] path elsewhere or rebuild the index.",
            path.display(),
            index.dims(),
            dims
        );
    }
    Ok(Arc::new(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use support_rag_core::index::IndexFilter;
    use support_rag_core::models::{Chunk, SourceType};

    fn entry(id: &str, vector: Vec<f32>, day: u32) -> IndexEntry {
        let created = Utc.with_ymd_and_hms(2025, 4, day, 0, 0, 0).unwrap();
        IndexEntry {
            chunk_id: id.into(),
            vector,
            model_version: "hashing-8d".into(),
            embedded_at: created,
            metadata: EntryMetadata {
                chunk: Chunk {
                    id: id.into(),
                    document_id: format!("doc-{}", id),
                    position: 0,
                    text: format!("text {}", id),
                    start: 0,
                    end: 6,
                    overlap: 0,
                    token_count: 2,
                    hash: "abc".into(),
                },
                customer_id: "c".into(),
                source_type: SourceType::Ticket,
                created_at: created,
            },
        }
    }

    #[test]
    fn test_reload_answers_queries_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");

        let index = VectorIndex::new(8);
        for i in 0..20u32 {
            let v: Vec<f32> = (0..8).map(|d| ((i * 7 + d * 3) % 11) as f32 - 4.3).collect();
            index.upsert(entry(&format!("c{}", i), v, 1 + i % 5)).unwrap();
        }
        save_index(&index, &path).unwrap();
        let reloaded = load_index(&path).unwrap();
        assert_eq!(reloaded.len(), index.len());

        let filter = IndexFilter::customer("c");
        for q in [[1.0f32, 0.2, -0.3, 0.0, 0.9, -1.0, 0.5, 0.1], [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]] {
            let before = index.query(&q, 10, Some(&filter)).unwrap();
            let after = reloaded.query(&q, 10, Some(&filter)).unwrap();
            let a: Vec<(&str, f32)> = before.iter().map(|h| (h.chunk_id.as_str(), h.score)).collect();
            let b: Vec<(&str, f32)> = after.iter().map(|h| (h.chunk_id.as_str(), h.score)).collect();
            assert_eq!(a, b);
        }
        for e in index.entries() {
            assert_eq!(*reloaded.get(&e.chunk_id).unwrap(), *e);
        }
    }

    #[test]
    fn test_load_or_create_checks_dims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        assert!(load_or_create(&path, 8).unwrap().is_empty());

        let index = VectorIndex::new(8);
        index.upsert(entry("a", vec![1.0; 8], 1)).unwrap();
        save_index(&index, &path).unwrap();
        assert_eq!(load_or_create(&path, 8).unwrap().len(), 1);
        assert!(load_or_create(&path, 16).is_err());
    }

    #[test]
    fn test_rejects_unknown_format_version() {
        let snapshot = IndexSnapshot {
            format_version: 99,
            dims: 2,
            entries: Vec::new(),
        };
        assert!(snapshot.restore().is_err());
    }
}
