//! In-memory vector index with brute-force cosine search.
//!
//! Vectors are normalized once at insertion so a query is a dot product
//! per candidate. Entries live in a fixed number of shards, each behind
//! its own `RwLock`:
//!
//! - upserts to the same `chunk_id` serialize on that id's shard and
//!   replace the entry in a single map insert (last writer wins, never
//!   both or neither),
//! - upserts to ids in different shards do not contend,
//! - queries take read locks only, one shard at a time.
//!
//! No lock is held across an `.await`; every method is synchronous.
//!
//! Results are totally ordered: score descending, then the parent
//! document's `created_at` descending, then `chunk_id` ascending.
//! An approximate structure could replace the brute-force scan behind
//! [`VectorIndex::query`] without changing its contract.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, trace};

use crate::embedding::{dot, l2_norm, normalize};
use crate::error::{Error, Result};
use crate::models::{IndexEntry, SourceType};

const SHARD_COUNT: usize = 16;

/// Tolerance when accepting already-normalized vectors on restore.
const UNIT_TOLERANCE: f32 = 1e-3;

type Shard = RwLock<HashMap<String, Arc<IndexEntry>>>;

/// Metadata restrictions applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFilter {
    pub customer_id: Option<String>,
    pub source_type: Option<SourceType>,
    /// Only compare against vectors from this model version.
    pub model_version: Option<String>,
}

impl IndexFilter {
    pub fn customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: Some(customer_id.into()),
            ..Self::default()
        }
    }

    pub fn with_model_version(mut self, model_version: impl Into<String>) -> Self {
        self.model_version = Some(model_version.into());
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(customer) = &self.customer_id {
            if &entry.metadata.customer_id != customer {
                return false;
            }
        }
        if let Some(source_type) = self.source_type {
            if entry.metadata.source_type != source_type {
                return false;
            }
        }
        if let Some(version) = &self.model_version {
            if &entry.model_version != version {
                return false;
            }
        }
        true
    }
}

/// One query result.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub entry: Arc<IndexEntry>,
}

/// Aggregate counts for `srag stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub documents: usize,
    pub customers: usize,
    pub dims: usize,
    /// Entry count per model version.
    pub model_versions: BTreeMap<String, usize>,
}

/// Stores `(chunk_id, vector, metadata)` entries and answers top-K queries.
pub struct VectorIndex {
    dims: usize,
    shards: Vec<Shard>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dims", &self.dims)
            .field("len", &self.len())
            .finish()
    }
}

impl VectorIndex {
    /// Create an empty index accepting vectors of `dims` dimensions.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Insert or atomically replace the entry for `entry.chunk_id`.
    ///
    /// The vector is normalized here. Re-upserting the same id and vector
    /// leaves the index observably unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::IndexConsistency`] for a dimension mismatch, a zero or
    /// non-finite vector, or a chunk id that disagrees with the metadata.
    /// Existing entries are untouched on error.
    pub fn upsert(&self, mut entry: IndexEntry) -> Result<()> {
        self.check_entry(&entry)?;
        entry.vector = normalize(&entry.vector).ok_or_else(|| {
            Error::IndexConsistency(format!(
                "chunk {} has a zero or non-finite vector",
                entry.chunk_id
            ))
        })?;
        self.insert(entry);
        Ok(())
    }

    /// Insert an entry whose vector is already unit-length, without
    /// renormalizing. Used when reloading a persisted index so stored
    /// vectors come back bit-identical.
    pub fn restore(&self, entry: IndexEntry) -> Result<()> {
        self.check_entry(&entry)?;
        let norm = l2_norm(&entry.vector);
        if !norm.is_finite() || (norm - 1.0).abs() > UNIT_TOLERANCE {
            return Err(Error::IndexConsistency(format!(
                "chunk {} restored with non-unit vector (norm {})",
                entry.chunk_id, norm
            )));
        }
        self.insert(entry);
        Ok(())
    }

    fn check_entry(&self, entry: &IndexEntry) -> Result<()> {
        if entry.vector.len() != self.dims {
            return Err(Error::IndexConsistency(format!(
                "chunk {} has {} dimensions, index expects {}",
                entry.chunk_id,
                entry.vector.len(),
                self.dims
            )));
        }
        if entry.chunk_id.is_empty() || entry.chunk_id != entry.metadata.chunk.id {
            return Err(Error::IndexConsistency(format!(
                "entry id '{}' does not match chunk id '{}'",
                entry.chunk_id, entry.metadata.chunk.id
            )));
        }
        Ok(())
    }

    fn insert(&self, entry: IndexEntry) {
        let id = entry.chunk_id.clone();
        trace!(chunk_id = %id, "upsert");
        self.write_shard(&id).insert(id, Arc::new(entry));
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, chunk_id: &str) -> bool {
        self.write_shard(chunk_id).remove(chunk_id).is_some()
    }

    /// Remove every entry belonging to `document_id`. Returns the count removed.
    pub fn delete_document(&self, document_id: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write().unwrap_or_else(PoisonError::into_inner);
            let before = map.len();
            map.retain(|_, e| e.metadata.chunk.document_id != document_id);
            removed += before - map.len();
        }
        debug!(document_id, removed, "deleted document entries");
        removed
    }

    pub fn get(&self, chunk_id: &str) -> Option<Arc<IndexEntry>> {
        self.read_shard(chunk_id).get(chunk_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`k` entries by cosine similarity to `vector`.
    ///
    /// `filter` is applied before scoring. Returns an empty list for
    /// `k == 0` or an empty index.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a query vector of the wrong dimension
    /// or with zero norm.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<IndexHit>> {
        if vector.len() != self.dims {
            return Err(Error::InvalidInput(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dims
            )));
        }
        let query = normalize(vector)
            .ok_or_else(|| Error::InvalidInput("query vector has zero norm".into()))?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<IndexHit> = Vec::new();
        for shard in &self.shards {
            let map = shard.read().unwrap_or_else(PoisonError::into_inner);
            hits.extend(
                map.values()
                    .filter(|e| filter.map_or(true, |f| f.matches(e)))
                    .map(|e| IndexHit {
                        chunk_id: e.chunk_id.clone(),
                        score: dot(&query, &e.vector).clamp(-1.0, 1.0),
                        entry: Arc::clone(e),
                    }),
            );
        }

        hits.sort_by(compare_hits);
        hits.truncate(k);
        debug!(result_count = hits.len(), k, "index query");
        Ok(hits)
    }

    /// All entries, ordered by `chunk_id`.
    pub fn entries(&self) -> Vec<Arc<IndexEntry>> {
        let mut all: Vec<Arc<IndexEntry>> = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let map = shard.read().unwrap_or_else(PoisonError::into_inner);
            all.extend(map.values().cloned());
        }
        all.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        all
    }

    /// Entries embedded with a model version other than `model_version`.
    pub fn stale_entries(&self, model_version: &str) -> Vec<Arc<IndexEntry>> {
        self.entries()
            .into_iter()
            .filter(|e| e.model_version != model_version)
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let entries = self.entries();
        let documents: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.metadata.chunk.document_id.as_str())
            .collect();
        let customers: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.metadata.customer_id.as_str())
            .collect();
        let mut model_versions = BTreeMap::new();
        for e in &entries {
            *model_versions.entry(e.model_version.clone()).or_insert(0) += 1;
        }
        IndexStats {
            entries: entries.len(),
            documents: documents.len(),
            customers: customers.len(),
            dims: self.dims,
            model_versions,
        }
    }

    fn shard_index(chunk_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        chunk_id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    fn read_shard(&self, chunk_id: &str) -> RwLockReadGuard<'_, HashMap<String, Arc<IndexEntry>>> {
        self.shards[Self::shard_index(chunk_id)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shard(
        &self,
        chunk_id: &str,
    ) -> RwLockWriteGuard<'_, HashMap<String, Arc<IndexEntry>>> {
        self.shards[Self::shard_index(chunk_id)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Score desc, then document `created_at` desc, then `chunk_id` asc.
fn compare_hits(a: &IndexHit, b: &IndexHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.entry.metadata.created_at.cmp(&a.entry.metadata.created_at))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
