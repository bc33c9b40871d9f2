//! # support-rag CLI (`srag`)
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag index <file>` | Chunk, embed and index documents (JSON array or JSONL) |
//! | `srag search "<query>" --customer <id>` | Ranked retrieval without generation |
//! | `srag ask "<query>" --customer <id>` | Full pipeline, prints the insight JSON |
//! | `srag reembed` | Regenerate vectors from an older model version |
//! | `srag stats` | Entry, document and model-version counts |
//! | `srag delete <document_id>` | Remove a document's entries |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use support_rag::{ask, config, index_cmd, search, stats};

/// support-rag CLI: retrieval-augmented insights over customer support history.
#[derive(Parser)]
#[command(
    name = "srag",
    about = "support-rag: retrieval-augmented insights over customer support history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index documents.
    ///
    /// Unchanged chunks are skipped, so re-running on the same file is cheap.
    Index {
        /// JSON array or JSON Lines of documents.
        documents: PathBuf,

        /// Show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve ranked chunks for a query, without generation.
    Search {
        query: String,

        /// Only search this customer's history.
        #[arg(long)]
        customer: String,

        /// Maximum number of results (overrides `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,

        /// Relevance floor (overrides `retrieval.min_score`).
        #[arg(long)]
        min_score: Option<f32>,

        /// Print candidates as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a structured support insight for a query.
    ///
    /// Ctrl-C cancels the whole pipeline; the index is never modified.
    Ask {
        query: String,

        #[arg(long)]
        customer: String,

        /// Print candidates and assembled context along with the insight.
        #[arg(long)]
        full: bool,
    },

    /// Re-embed entries produced by a different model version.
    Reembed,

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delete all entries of a document.
    Delete { document_id: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "support_rag=info,support_rag_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { documents, dry_run } => {
            index_cmd::run_index(&cfg, &documents, dry_run).await?;
        }
        Commands::Search {
            query,
            customer,
            k,
            min_score,
            json,
        } => {
            search::run_search(&cfg, &query, &customer, k, min_score, json).await?;
        }
        Commands::Ask {
            query,
            customer,
            full,
        } => {
            ask::run_ask(&cfg, &query, &customer, full).await?;
        }
        Commands::Reembed => {
            index_cmd::run_reembed(&cfg).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json)?;
        }
        Commands::Delete { document_id } => {
            index_cmd::run_delete(&cfg, &document_id)?;
        }
    }

    Ok(())
}
