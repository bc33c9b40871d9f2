//! End-to-end tests of build and query through scripted services.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use support_rag_core::assemble::{AssemblerConfig, ContextAssembler};
use support_rag_core::build::IndexBuilder;
use support_rag_core::chunk::{Chunker, ChunkerConfig};
use support_rag_core::embedding::{Embedder, EmbeddingService};
use support_rag_core::index::VectorIndex;
use support_rag_core::insight::{CompletionModel, InsightGenerator, NO_CONTEXT_SUMMARY};
use support_rag_core::models::{Document, QueryMetadata, Sentiment, SourceType};
use support_rag_core::pipeline::QueryPipeline;
use support_rag_core::retrieve::{RetrievalParams, Retriever};
use support_rag_core::{Error, ServiceError};

const BILLING: &[&str] = &["refund", "charge", "charged", "duplicate", "invoice", "billing", "payment"];
const ACCOUNT: &[&str] = &["password", "reset", "login", "locked", "account"];

/// Counts topic keywords per axis, plus a small constant axis so no text
/// embeds to the zero vector.
struct TopicService;

#[async_trait]
impl EmbeddingService for TopicService {
    fn name(&self) -> &str {
        "topic"
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        _model_version: &str,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32, 0.0, 0.1];
                for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                    if BILLING.contains(&word) {
                        v[0] += 1.0;
                    } else if ACCOUNT.contains(&word) {
                        v[1] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _schema: &Value) -> Result<String, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ServiceError::permanent("no scripted response left"))
    }
}

fn tickets() -> Vec<Document> {
    vec![
        Document {
            id: "T-1001".into(),
            source_type: SourceType::Ticket,
            text: "I was charged twice for my March invoice. This duplicate charge needs a refund."
                .into(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap(),
            customer_id: "CUST-1".into(),
        },
        Document {
            id: "T-1002".into(),
            source_type: SourceType::Ticket,
            text: "I cannot login. The password reset email never arrives and my account is locked."
                .into(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 5, 8, 30, 0).unwrap(),
            customer_id: "CUST-1".into(),
        },
    ]
}

async fn build_index() -> (Arc<VectorIndex>, Embedder) {
    let index = Arc::new(VectorIndex::new(3));
    let embedder = Embedder::new(Arc::new(TopicService), "topic-v1", 3);
    let builder = IndexBuilder::new(
        Chunker::new(ChunkerConfig::default()),
        embedder.clone(),
        index.clone(),
    )
    .unwrap();
    let report = builder.build(&tickets()).await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.embedded, 2);
    (index, embedder)
}

fn pipeline(index: Arc<VectorIndex>, embedder: Embedder, model: Arc<ScriptedModel>) -> QueryPipeline {
    QueryPipeline::new(
        Retriever::new(embedder, index),
        ContextAssembler::new(AssemblerConfig::default()).unwrap(),
        InsightGenerator::new(model),
        RetrievalParams { k: 5, min_score: 0.5 },
    )
}

const REFUND_INSIGHT: &str = r#"{
    "issue_summary": "The customer was charged twice for the March invoice.",
    "customer_sentiment": "Frustrated",
    "draft_reply": "We are sorry for the duplicate charge. A refund is on its way.",
    "recommended_actions": ["Issue a refund for the duplicate charge", "Confirm the refund by email"]
}"#;

#[tokio::test]
async fn refund_query_retrieves_only_billing_ticket() {
    let (index, embedder) = build_index().await;

    let candidates = Retriever::new(embedder.clone(), index.clone())
        .retrieve("refund issue", "CUST-1", &RetrievalParams { k: 5, min_score: 0.5 })
        .await
        .unwrap();
    assert!(!candidates.is_empty());
    assert!(candidates.iter().all(|c| c.chunk.document_id == "T-1001"));

    let model = ScriptedModel::new(&[REFUND_INSIGHT]);
    let outcome = pipeline(index, embedder, model.clone())
        .run(&QueryMetadata {
            query_text: "refund issue".into(),
            customer_id: "CUST-1".into(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.insight.customer_sentiment, Sentiment::Frustrated);
    assert!(outcome
        .insight
        .recommended_actions
        .iter()
        .any(|a| a.to_lowercase().contains("refund")));

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("duplicate charge"));
    assert!(!prompts[0].contains("password reset"));
}

#[tokio::test]
async fn no_relevant_context_yields_generic_insight() {
    let (index, embedder) = build_index().await;
    let model = ScriptedModel::new(&[]);
    let outcome = pipeline(index, embedder, model.clone())
        .run(&QueryMetadata {
            query_text: "where is my shipment".into(),
            customer_id: "CUST-1".into(),
        })
        .await
        .unwrap();

    assert!(outcome.candidates.is_empty());
    assert!(outcome.context.is_empty());
    assert!(!outcome.context.truncated);
    assert_eq!(outcome.context.total_token_count, 0);
    assert!(outcome.insight.recommended_actions.is_empty());
    assert_eq!(outcome.insight.issue_summary, NO_CONTEXT_SUMMARY);
    assert!(model.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_output_after_repair_is_an_error() {
    let (index, embedder) = build_index().await;
    let model = ScriptedModel::new(&[
        r#"{"issue_summary": "x", "customer_sentiment": "Unknown"}"#,
        r#"{"issue_summary": "x", "customer_sentiment": "Unknown"}"#,
    ]);
    let err = pipeline(index, embedder, model)
        .run(&QueryMetadata {
            query_text: "refund".into(),
            customer_id: "CUST-1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedOutput { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_and_rebuilds_agree() {
    let (index, embedder) = build_index().await;
    let builder = IndexBuilder::new(
        Chunker::new(ChunkerConfig::default()),
        embedder.clone(),
        index.clone(),
    )
    .unwrap();
    let retriever = Retriever::new(embedder, index.clone());
    let params = RetrievalParams { k: 5, min_score: 0.5 };
    let docs = tickets();

    let queries = (0..16).map(|_| retriever.retrieve("refund issue", "CUST-1", &params));
    let (results, report) = tokio::join!(futures::future::join_all(queries), builder.build(&docs));

    assert_eq!(report.unchanged, 2);
    for result in results {
        let ids: Vec<String> = result.unwrap().into_iter().map(|c| c.chunk.document_id).collect();
        assert_eq!(ids, vec!["T-1001".to_string()]);
    }
    assert_eq!(index.len(), 2);
}
