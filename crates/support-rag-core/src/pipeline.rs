//! The query-time pipeline: Retriever → ContextAssembler → InsightGenerator.
//!
//! The pipeline only reads the index, so cancelling it at any await point
//! leaves the index exactly as it was.

use std::future::Future;

use serde::Serialize;
use tracing::{info, instrument};

use crate::assemble::ContextAssembler;
use crate::error::{Error, Result};
use crate::insight::InsightGenerator;
use crate::models::{AssembledContext, Insight, QueryMetadata, RetrievedCandidate};
use crate::retrieve::{RetrievalParams, Retriever};

/// Everything one query produced, for callers that want more than the insight.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub candidates: Vec<RetrievedCandidate>,
    pub context: AssembledContext,
    pub insight: Insight,
}

#[derive(Debug, Clone)]
pub struct QueryPipeline {
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: InsightGenerator,
    params: RetrievalParams,
}

impl QueryPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: ContextAssembler,
        generator: InsightGenerator,
        params: RetrievalParams,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
            params,
        }
    }

    /// Run retrieval, assembly and generation for one query.
    #[instrument(skip_all, fields(op = "query", query = %request.query_text, customer_id = %request.customer_id))]
    pub async fn run(&self, request: &QueryMetadata) -> Result<QueryOutcome> {
        let candidates = self
            .retriever
            .retrieve(&request.query_text, &request.customer_id, &self.params)
            .await?;
        let context = self
            .assembler
            .assemble(&candidates, self.assembler.config().token_budget);
        let insight = self.generator.generate(&context, request).await?;

        info!(
            result_count = candidates.len(),
            token_count = context.total_token_count,
            truncated = context.truncated,
            "query complete"
        );
        Ok(QueryOutcome {
            candidates,
            context,
            insight,
        })
    }

    /// Like [`run`](Self::run), but abandons the whole pipeline with
    /// [`Error::Cancelled`] as soon as `cancel` completes.
    pub async fn run_until<F>(&self, request: &QueryMetadata, cancel: F) -> Result<QueryOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => Err(Error::Cancelled),
            outcome = self.run(request) => outcome,
        }
    }
}
