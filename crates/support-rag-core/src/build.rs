//! Build-time orchestration: chunk documents, embed in parallel batches,
//! upsert into the [`VectorIndex`].
//!
//! Batches run with bounded concurrency and no ordering between them.
//! A failed batch is logged and counted in the [`BuildReport`]; the
//! remaining batches still land. Chunks whose content hash and model
//! version already match the index are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chunk::Chunker;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Document, EmbeddingVector, EntryMetadata, IndexEntry};

/// One failure recorded during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildError {
    /// Document id, or the document ids of a failed batch.
    pub context: String,
    pub message: String,
}

/// Outcome of [`IndexBuilder::build`] or [`IndexBuilder::reembed_stale`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    /// Chunks already indexed with the same hash and model version.
    pub unchanged: usize,
    pub failed: usize,
    /// Entries for chunk positions a document no longer produces.
    pub removed: usize,
    pub errors: Vec<BuildError>,
}

/// Chunks, embeds and indexes documents.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    chunker: Chunker,
    embedder: Embedder,
    index: Arc<VectorIndex>,
    batch_size: usize,
    concurrency: usize,
}

impl IndexBuilder {
    pub fn new(chunker: Chunker, embedder: Embedder, index: Arc<VectorIndex>) -> Result<Self> {
        if embedder.dims() != index.dims() {
            return Err(Error::InvalidInput(format!(
                "embedder produces {} dimensions but the index holds {}",
                embedder.dims(),
                index.dims()
            )));
        }
        Ok(Self {
            chunker,
            embedder,
            index,
            batch_size: 64,
            concurrency: 4,
        })
    }

    /// Chunks per embedding request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embedding requests in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Chunk `documents` and report what a build would do, without
    /// embedding or touching the index. `embedded` counts the chunks that
    /// would be sent to the embedding service.
    pub fn plan(&self, documents: &[Document]) -> BuildReport {
        let (pending, _, mut report) = self.prepare(documents);
        report.embedded = pending.len();
        report
    }

    /// Index `documents`, replacing any earlier entries they produced.
    #[instrument(skip_all, fields(op = "build", input_count = documents.len(), model = %self.embedder.model_version()))]
    pub async fn build(&self, documents: &[Document]) -> BuildReport {
        let (pending, produced, mut report) = self.prepare(documents);
        self.embed_and_upsert(pending, &mut report).await;

        // Drop entries for positions a re-chunked document no longer has.
        for entry in self.index.entries() {
            let doc = &entry.metadata.chunk.document_id;
            if let Some(ids) = produced.get(doc.as_str()) {
                if !ids.contains(entry.chunk_id.as_str()) && self.index.delete(&entry.chunk_id) {
                    report.removed += 1;
                }
            }
        }

        info!(
            documents = report.documents,
            chunks = report.chunks,
            embedded = report.embedded,
            unchanged = report.unchanged,
            failed = report.failed,
            removed = report.removed,
            "index build complete"
        );
        report
    }

    /// Regenerate vectors for every entry embedded with another model version.
    #[instrument(skip_all, fields(op = "reembed", model = %self.embedder.model_version()))]
    pub async fn reembed_stale(&self) -> BuildReport {
        let stale = self.index.stale_entries(self.embedder.model_version());
        let mut report = BuildReport {
            documents: stale
                .iter()
                .map(|e| e.metadata.chunk.document_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            chunks: stale.len(),
            ..BuildReport::default()
        };
        let pending: Vec<EntryMetadata> = stale.iter().map(|e| e.metadata.clone()).collect();
        self.embed_and_upsert(pending, &mut report).await;
        info!(
            chunks = report.chunks,
            embedded = report.embedded,
            failed = report.failed,
            "re-embedding complete"
        );
        report
    }

    /// Chunk every document. Returns the chunks needing embedding, the
    /// chunk ids each document now produces, and a partial report.
    fn prepare<'a>(
        &self,
        documents: &'a [Document],
    ) -> (Vec<EntryMetadata>, HashMap<&'a str, HashSet<String>>, BuildReport) {
        let mut report = BuildReport::default();
        let mut pending = Vec::new();
        let mut produced: HashMap<&str, HashSet<String>> = HashMap::new();

        for document in documents {
            report.documents += 1;
            let chunks = match self.chunker.chunk(document) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "skipping document");
                    report.errors.push(BuildError {
                        context: document.id.clone(),
                        message: e.to_string(),
                    });
                    report.failed += 1;
                    continue;
                }
            };
            report.chunks += chunks.len();

            let ids = produced.entry(document.id.as_str()).or_default();
            for chunk in chunks {
                ids.insert(chunk.id.clone());
                let up_to_date = self.index.get(&chunk.id).is_some_and(|e| {
                    e.metadata.chunk.hash == chunk.hash
                        && e.model_version == self.embedder.model_version()
                        && e.metadata.customer_id == document.customer_id
                });
                if up_to_date {
                    report.unchanged += 1;
                    continue;
                }
                pending.push(EntryMetadata {
                    chunk,
                    customer_id: document.customer_id.clone(),
                    source_type: document.source_type,
                    created_at: document.created_at,
                });
            }
        }

        debug!(pending = pending.len(), unchanged = report.unchanged, "chunked documents");
        (pending, produced, report)
    }

    async fn embed_and_upsert(&self, pending: Vec<EntryMetadata>, report: &mut BuildReport) {
        if pending.is_empty() {
            return;
        }

        let batches: Vec<Vec<EntryMetadata>> = pending
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let results: Vec<(Vec<EntryMetadata>, Result<Vec<EmbeddingVector>>)> =
            stream::iter(batches)
                .map(|batch| async move {
                    let texts: Vec<String> = batch.iter().map(|m| m.chunk.text.clone()).collect();
                    let label = batch_label(&batch);
                    let result = self.embedder.embed_batch_labeled(&texts, &label).await;
                    (batch, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (batch, result) in results {
            match result {
                Ok(vectors) => {
                    for (metadata, vector) in batch.into_iter().zip(vectors) {
                        let chunk_id = metadata.chunk.id.clone();
                        let entry = entry_from(metadata, vector);
                        match self.index.upsert(entry) {
                            Ok(()) => report.embedded += 1,
                            Err(e) => {
                                warn!(chunk_id = %chunk_id, error = %e, "upsert rejected");
                                report.failed += 1;
                                report.errors.push(BuildError {
                                    context: chunk_id,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(input_count = batch.len(), error = %e, "embedding batch failed");
                    report.failed += batch.len();
                    report.errors.push(BuildError {
                        context: batch_label(&batch),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

fn entry_from(metadata: EntryMetadata, embedding: EmbeddingVector) -> IndexEntry {
    IndexEntry {
        chunk_id: metadata.chunk.id.clone(),
        vector: embedding.vector,
        model_version: embedding.model_version,
        embedded_at: embedding.created_at,
        metadata,
    }
}

/// Distinct document ids of a batch, in order.
fn batch_label(batch: &[EntryMetadata]) -> String {
    let mut seen = HashSet::new();
    let ids: Vec<&str> = batch
        .iter()
        .map(|m| m.chunk.document_id.as_str())
        .filter(|id| seen.insert(*id))
        .collect();
    format!("documents {}", ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkerConfig;
    use crate::embedding::EmbeddingService;
    use crate::error::ServiceError;
    use crate::models::SourceType;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Letter-frequency vectors; fails any batch containing "FAIL".
    #[derive(Default)]
    struct LetterService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingService for LetterService {
        fn name(&self) -> &str {
            "letters"
        }

        async fn embed_texts(
            &self,
            texts: &[String],
            _model_version: &str,
        ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(ServiceError::permanent("400 Bad Request"));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.01f32; 4];
                    for b in t.bytes() {
                        v[(b % 4) as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.into(),
            source_type: SourceType::Ticket,
            text: text.into(),
            created_at: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            customer_id: "cust".into(),
        }
    }

    fn builder(service: Arc<LetterService>, version: &str, index: Arc<VectorIndex>) -> IndexBuilder {
        let embedder = Embedder::new(service, version, 4)
            .with_retry_policy(RetryPolicy::default().with_max_attempts(1));
        let chunker = Chunker::new(ChunkerConfig {
            max_tokens: 8,
            min_tokens: 2,
            overlap_ratio: 0.0,
        });
        IndexBuilder::new(chunker, embedder, index)
            .unwrap()
            .with_batch_size(2)
            .with_concurrency(3)
    }

    fn long_text() -> String {
        "Charged twice this month. Please refund the duplicate. Card ends 4242. \
         Invoice number 1001 shows both charges."
            .to_string()
    }

    #[tokio::test]
    async fn test_build_indexes_all_chunks() {
        let index = Arc::new(VectorIndex::new(4));
        let service = Arc::new(LetterService::default());
        let b = builder(service.clone(), "v1", index.clone());

        let report = b.build(&[doc("t1", &long_text()), doc("t2", "Password reset please.")]).await;
        assert_eq!(report.documents, 2);
        assert!(report.chunks > 2);
        assert_eq!(report.embedded, report.chunks);
        assert_eq!(report.failed, 0);
        assert_eq!(index.len(), report.chunks);
        assert_eq!(
            service.calls.load(Ordering::SeqCst),
            report.chunks.div_ceil(2)
        );
    }

    #[tokio::test]
    async fn test_rebuild_skips_unchanged_chunks() {
        let index = Arc::new(VectorIndex::new(4));
        let service = Arc::new(LetterService::default());
        let b = builder(service.clone(), "v1", index.clone());
        let docs = [doc("t1", &long_text())];

        let first = b.build(&docs).await;
        let calls = service.calls.load(Ordering::SeqCst);
        let second = b.build(&docs).await;
        assert_eq!(second.unchanged, first.chunks);
        assert_eq!(second.embedded, 0);
        assert_eq!(service.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_shrunk_document_drops_old_positions() {
        let index = Arc::new(VectorIndex::new(4));
        let b = builder(Arc::new(LetterService::default()), "v1", index.clone());
        let first = b.build(&[doc("t1", &long_text())]).await;
        let second = b.build(&[doc("t1", "Resolved, thanks.")]).await;
        assert_eq!(second.chunks, 1);
        assert_eq!(second.removed, first.chunks - 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let index = Arc::new(VectorIndex::new(4));
        let b = builder(Arc::new(LetterService::default()), "v1", index.clone()).with_batch_size(1);

        let report = b
            .build(&[doc("empty", "  \r\n "), doc("bad", "FAIL"), doc("ok", "Refund issued.")])
            .await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.embedded, 1);
        assert_eq!(index.len(), 1);
        let contexts: Vec<&str> = report.errors.iter().map(|e| e.context.as_str()).collect();
        assert!(contexts.contains(&"empty"));
        assert!(contexts.contains(&"documents bad"));
    }

    #[tokio::test]
    async fn test_reembed_stale_replaces_model_version() {
        let index = Arc::new(VectorIndex::new(4));
        let service = Arc::new(LetterService::default());
        let v1 = builder(service.clone(), "v1", index.clone());
        let built = v1.build(&[doc("t1", &long_text())]).await;

        let v2 = builder(service, "v2", index.clone());
        assert_eq!(index.stale_entries("v2").len(), built.chunks);
        let report = v2.reembed_stale().await;
        assert_eq!(report.embedded, built.chunks);
        assert_eq!(report.documents, 1);
        assert!(index.stale_entries("v2").is_empty());
        assert_eq!(index.len(), built.chunks);
    }

    #[test]
    fn test_plan_does_not_embed() {
        let index = Arc::new(VectorIndex::new(4));
        let service = Arc::new(LetterService::default());
        let b = builder(service.clone(), "v1", index.clone());
        let report = b.plan(&[doc("t1", &long_text())]);
        assert!(report.chunks > 1);
        assert_eq!(report.embedded, report.chunks);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_dims_mismatch_rejected() {
        let embedder = Embedder::new(Arc::new(LetterService::default()), "v1", 4);
        let err = IndexBuilder::new(Chunker::new(ChunkerConfig::default()), embedder, Arc::new(VectorIndex::new(8)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
