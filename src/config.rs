//! TOML configuration.
//!
//! Every numeric knob has a conservative default; only `[index] path` is
//! required. API keys are never read from the file.
//!
//! ```toml
//! [index]
//! path = "./data/index.json"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use support_rag_core::assemble::AssemblerConfig;
use support_rag_core::chunk::ChunkerConfig;
use support_rag_core::retrieve::RetrievalParams;
use support_rag_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let core = ChunkerConfig::default();
        Self {
            max_tokens: core.max_tokens,
            min_tokens: core.min_tokens,
            overlap_ratio: core.overlap_ratio,
        }
    }
}

impl ChunkingConfig {
    pub fn to_core(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
            overlap_ratio: self.overlap_ratio,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let core = RetrievalParams::default();
        Self {
            k: core.k,
            min_score: core.min_score,
        }
    }
}

impl RetrievalConfig {
    pub fn to_core(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.k,
            min_score: self.min_score,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    /// Size this to the model's context window minus the output reservation.
    pub token_budget: usize,
    pub dedup_threshold: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let core = AssemblerConfig::default();
        Self {
            token_budget: core.token_budget,
            dedup_threshold: core.dedup_threshold,
        }
    }
}

impl ContextConfig {
    pub fn to_core(&self) -> AssemblerConfig {
        AssemblerConfig {
            token_budget: self.token_budget,
            dedup_threshold: self.dedup_threshold,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config.chunking.to_core().validate()?;
    config
        .retrieval
        .to_core()
        .validate()
        .context("invalid [retrieval] section")?;
    config
        .context
        .to_core()
        .validate()
        .context("invalid [context] section")?;
    if config.context.token_budget < config.chunking.max_tokens {
        bail!(
            "context.token_budget ({}) must be >= chunking.max_tokens ({}) so a full chunk fits",
            config.context.token_budget,
            config.chunking.max_tokens
        );
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" => {}
        "hashing" => {
            if embedding.dims.unwrap_or(0) == 0 {
                bail!("embedding.dims must be > 0 when provider is 'hashing'");
            }
        }
        "openai" | "ollama" | "local" => {
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, ollama, or local.",
            other
        ),
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.concurrency == 0 {
        bail!("embedding.concurrency must be > 0");
    }
    if embedding.max_retries == 0 {
        bail!("embedding.max_retries must be >= 1 (it counts the first attempt)");
    }

    let generation = &config.generation;
    match generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if generation.max_retries == 0 {
        bail!("generation.max_retries must be >= 1 (it counts the first attempt)");
    }

    Ok(())
}
