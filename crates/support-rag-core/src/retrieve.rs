//! Query-time retrieval: embed the query, search one customer's entries,
//! apply the relevance floor.
//!
//! An empty result is a normal outcome ("no relevant context"), never an
//! error. Ordering is exactly the index's deterministic ordering; ranks
//! are assigned 1..=n after the floor is applied.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{IndexFilter, VectorIndex};
use crate::models::RetrievedCandidate;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum candidates to return.
    pub k: usize,
    /// Minimum cosine similarity a candidate must reach.
    pub min_score: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: 8,
            min_score: 0.5,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidInput("retrieval k must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(Error::InvalidInput(format!(
                "min_score must be within [-1, 1], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// Ranks indexed chunks against a query for one customer.
#[derive(Debug, Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return at most `params.k` candidates for `customer_id` scoring at
    /// least `params.min_score`, best first.
    ///
    /// Only entries embedded with the embedder's model version are compared.
    #[instrument(skip(self, params), fields(op = "retrieve", k = params.k, min_score = params.min_score))]
    pub async fn retrieve(
        &self,
        query: &str,
        customer_id: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<RetrievedCandidate>> {
        params.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed_batch_labeled(&[query.to_string()], &format!("query '{}'", query))
            .await?
            .pop()
            .ok_or_else(|| Error::InvalidInput("query produced no embedding".into()))?;

        let filter =
            IndexFilter::customer(customer_id).with_model_version(self.embedder.model_version());
        let hits = self.index.query(&query_vec.vector, params.k, Some(&filter))?;

        let candidates: Vec<RetrievedCandidate> = hits
            .into_iter()
            .take_while(|hit| hit.score >= params.min_score)
            .enumerate()
            .map(|(i, hit)| {
                let meta = &hit.entry.metadata;
                RetrievedCandidate {
                    chunk: meta.chunk.clone(),
                    customer_id: meta.customer_id.clone(),
                    source_type: meta.source_type,
                    created_at: meta.created_at,
                    similarity_score: hit.score,
                    rank: i + 1,
                }
            })
            .collect();

        debug!(result_count = candidates.len(), "retrieved candidates");
        Ok(candidates)
    }
}
