//! Structured insight generation with validation and one repair attempt.
//!
//! Generation is a two-state machine: the initial attempt, then at most
//! one repair attempt that shows the model its previous output and the
//! list of violations. If the repaired output is still invalid the
//! result is [`Error::MalformedOutput`]; an invalid response is never
//! coerced into a default [`Insight`].
//!
//! An empty [`AssembledContext`] short-circuits to a fixed, generic
//! insight without calling the model, unless it is empty because the
//! token budget could not fit the top candidate, which is an error.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::schema_for;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result, ServiceError};
use crate::models::{AssembledContext, Insight, QueryMetadata, Sentiment};
use crate::retry::{retry, RetryPolicy};

/// Summary used when retrieval found nothing relevant.
pub const NO_CONTEXT_SUMMARY: &str =
    "No relevant support history was found for this customer's request.";

const NO_CONTEXT_REPLY: &str = "Thanks for reaching out. We are looking into your request \
and will follow up as soon as we have more information.";

/// External generative model capability.
///
/// Implementations must not retry internally; the [`InsightGenerator`]
/// owns the retry policy.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Complete `prompt`, asking for a response that matches `response_schema`.
    async fn complete(
        &self,
        prompt: &str,
        response_schema: &Value,
    ) -> std::result::Result<String, ServiceError>;
}

/// JSON Schema of [`Insight`], handed to the model boundary.
pub fn response_schema() -> Value {
    serde_json::to_value(schema_for!(Insight)).unwrap_or_default()
}

/// Turns an assembled context into a validated [`Insight`].
#[derive(Clone)]
pub struct InsightGenerator {
    model: Arc<dyn CompletionModel>,
    retry: RetryPolicy,
    schema: Value,
}

impl std::fmt::Debug for InsightGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightGenerator")
            .field("model", &self.model.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl InsightGenerator {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::default(),
            schema: response_schema(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generate an insight for `query` from `context`.
    ///
    /// # Errors
    ///
    /// - [`Error::GenerationService`] when the model call fails (after
    ///   retries, for transient failures).
    /// - [`Error::MalformedOutput`] when the repair attempt also fails
    ///   validation.
    /// - [`Error::InvalidInput`] when the context is empty only because
    ///   the budget could not fit a single retrieved chunk.
    #[instrument(skip_all, fields(op = "generate", customer_id = %query.customer_id, model = self.model.name()))]
    pub async fn generate(&self, context: &AssembledContext, query: &QueryMetadata) -> Result<Insight> {
        if context.is_empty() {
            if context.truncated {
                return Err(Error::InvalidInput(
                    "token budget is smaller than the highest-ranked chunk; \
                     raise context.token_budget"
                        .into(),
                ));
            }
            debug!("empty context, returning generic insight");
            return Ok(no_context_insight());
        }

        let prompt = build_prompt(context, query, &self.schema);
        let raw = self.complete(&prompt, query).await?;
        let violations = match parse_insight(&raw, true) {
            Ok(insight) => return Ok(insight),
            Err(violations) => violations,
        };

        warn!(
            attempt = 1,
            violations = %violations.join("; "),
            "model output failed validation, attempting repair"
        );
        let repair = build_repair_prompt(&prompt, &raw, &violations);
        let raw = self.complete(&repair, query).await?;
        parse_insight(&raw, true).map_err(|violations| Error::MalformedOutput { violations, raw })
    }

    async fn complete(&self, prompt: &str, query: &QueryMetadata) -> Result<String> {
        let label = format!("query '{}'", query.query_text);
        let label = label.as_str();
        let schema = &self.schema;
        retry(&self.retry, "generate", move || async move {
            self.model
                .complete(prompt, schema)
                .await
                .map_err(|e| Error::generation(label, e))
        })
        .await
    }
}

fn no_context_insight() -> Insight {
    Insight {
        issue_summary: NO_CONTEXT_SUMMARY.to_string(),
        customer_sentiment: Sentiment::Neutral,
        draft_reply: NO_CONTEXT_REPLY.to_string(),
        recommended_actions: Vec::new(),
    }
}

/// Render the generation prompt: instructions, the request, numbered
/// context entries, and the output schema.
pub fn build_prompt(context: &AssembledContext, query: &QueryMetadata, schema: &Value) -> String {
    let mut prompt = String::from(
        "You are a customer support assistant. Using only the support history below, \
         analyse the customer's request.\n\n",
    );
    prompt.push_str(&format!("Customer: {}\n", query.customer_id));
    prompt.push_str(&format!("Request: {}\n\n", query.query_text));
    prompt.push_str("Support history:\n");
    for (i, c) in context.chunks.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {} {} (relevance {:.2})\n{}\n\n",
            i + 1,
            c.source_type,
            c.created_at.format("%Y-%m-%d"),
            c.similarity_score,
            c.chunk.text
        ));
    }
    let sentiments: Vec<&str> = Sentiment::ALL.iter().map(|s| s.as_str()).collect();
    prompt.push_str(
        "Respond with a single JSON object and nothing else. It must match this JSON Schema:\n",
    );
    prompt.push_str(&serde_json::to_string_pretty(schema).unwrap_or_default());
    prompt.push_str(&format!(
        "\n\nRules:\n- issue_summary: one or two sentences.\n- customer_sentiment: one of {}.\n\
         - draft_reply: a reply the agent could send.\n\
         - recommended_actions: at least one concrete next step, most important first.\n",
        sentiments.join(", ")
    ));
    prompt
}

fn build_repair_prompt(original: &str, raw: &str, violations: &[String]) -> String {
    let mut prompt = String::from(original);
    prompt.push_str("\nYour previous response was:\n");
    prompt.push_str(raw);
    prompt.push_str("\n\nIt was rejected for these reasons:\n");
    for v in violations {
        prompt.push_str(&format!("- {}\n", v));
    }
    prompt.push_str("\nReturn a corrected JSON object only.\n");
    prompt
}

/// Validate raw model output against the [`Insight`] schema.
///
/// A surrounding Markdown code fence is ignored and sentiment matches
/// case-insensitively; everything else is strict. `require_actions`
/// rejects an empty `recommended_actions`. Returns every violation found,
/// not just the first.
pub fn parse_insight(raw: &str, require_actions: bool) -> std::result::Result<Insight, Vec<String>> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| vec![format!("response is not valid JSON: {}", e)])?;
    let obj = value
        .as_object()
        .ok_or_else(|| vec!["response is not a JSON object".to_string()])?;

    let mut violations = Vec::new();

    let issue_summary = required_text(obj.get("issue_summary"), "issue_summary", &mut violations);
    let draft_reply = required_text(obj.get("draft_reply"), "draft_reply", &mut violations);

    let customer_sentiment = match obj.get("customer_sentiment") {
        None => {
            violations.push("missing field `customer_sentiment`".to_string());
            None
        }
        Some(Value::String(s)) => match s.parse::<Sentiment>() {
            Ok(sentiment) => Some(sentiment),
            Err(_) => {
                let allowed: Vec<&str> = Sentiment::ALL.iter().map(|s| s.as_str()).collect();
                violations.push(format!(
                    "field `customer_sentiment` has invalid value '{}', expected one of {}",
                    s,
                    allowed.join(", ")
                ));
                None
            }
        },
        Some(other) => {
            violations.push(format!(
                "field `customer_sentiment` must be a string, got {}",
                type_name(other)
            ));
            None
        }
    };

    let recommended_actions = match obj.get("recommended_actions") {
        None => {
            violations.push("missing field `recommended_actions`".to_string());
            None
        }
        Some(Value::Array(items)) => {
            let mut actions = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::String(s) if !s.trim().is_empty() => actions.push(s.trim().to_string()),
                    Value::String(_) => violations
                        .push(format!("field `recommended_actions[{}]` must not be empty", i)),
                    other => violations.push(format!(
                        "field `recommended_actions[{}]` must be a string, got {}",
                        i,
                        type_name(other)
                    )),
                }
            }
            if require_actions && items.is_empty() {
                violations.push("field `recommended_actions` must not be empty".to_string());
            }
            Some(actions)
        }
        Some(other) => {
            violations.push(format!(
                "field `recommended_actions` must be an array of strings, got {}",
                type_name(other)
            ));
            None
        }
    };

    match (issue_summary, customer_sentiment, draft_reply, recommended_actions) {
        (Some(issue_summary), Some(customer_sentiment), Some(draft_reply), Some(recommended_actions))
            if violations.is_empty() =>
        {
            Ok(Insight {
                issue_summary,
                customer_sentiment,
                draft_reply,
                recommended_actions,
            })
        }
        _ => Err(violations),
    }
}

fn required_text(value: Option<&Value>, field: &str, violations: &mut Vec<String>) -> Option<String> {
    match value {
        None => {
            violations.push(format!("missing field `{}`", field));
            None
        }
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) => {
            violations.push(format!("field `{}` must not be empty", field));
            None
        }
        Some(other) => {
            violations.push(format!(
                "field `{}` must be a string, got {}",
                field,
                type_name(other)
            ));
            None
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
