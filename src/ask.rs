//! `srag ask`: the full query pipeline, printing the insight as JSON.

use anyhow::{bail, Result};
use support_rag_core::assemble::ContextAssembler;
use support_rag_core::models::QueryMetadata;
use support_rag_core::pipeline::QueryPipeline;
use support_rag_core::Error;

use crate::config::Config;
use crate::generation;
use crate::search::open_retriever;

pub async fn run_ask(config: &Config, query: &str, customer_id: &str, full: bool) -> Result<()> {
    if !config.generation.is_enabled() {
        bail!("Generation provider is disabled. Set [generation] provider in config.");
    }
    let pipeline = QueryPipeline::new(
        open_retriever(config)?,
        ContextAssembler::new(config.context.to_core())?,
        generation::create_generator(&config.generation)?,
        config.retrieval.to_core(),
    );
    let request = QueryMetadata {
        query_text: query.to_string(),
        customer_id: customer_id.to_string(),
    };

    let cancel = async {
        // If the handler cannot be installed, never cancel.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = match pipeline.run_until(&request, cancel).await {
        Ok(outcome) => outcome,
        Err(Error::Cancelled) => bail!("Query cancelled."),
        Err(Error::MalformedOutput { violations, raw }) => {
            eprintln!("Model output after repair attempt:\n{}", raw);
            bail!("Model returned malformed output: {}", violations.join("; "));
        }
        Err(e) => return Err(e.into()),
    };

    if full {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&outcome.insight)?);
    }
    if outcome.context.truncated {
        eprintln!(
            "Note: context truncated to {} tokens ({} chunks).",
            outcome.context.total_token_count,
            outcome.context.chunks.len()
        );
    }
    Ok(())
}
