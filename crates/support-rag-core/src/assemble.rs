//! Token-bounded context assembly.
//!
//! Candidates are taken greedily in rank order. A candidate whose text is
//! near-identical to one already included is skipped (and counted in
//! [`AssembledContext::deduplicated`]); the first candidate that would
//! push the total past the budget ends assembly and sets `truncated`.
//! The output keeps rank order.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{AssembledContext, RetrievedCandidate};

/// Assembly parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    /// Maximum summed token count of included chunks.
    pub token_budget: usize,
    /// Word-set Jaccard similarity at or above which two chunks count as
    /// duplicates.
    pub dedup_threshold: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            token_budget: 3000,
            dedup_threshold: 0.9,
        }
    }
}

impl AssemblerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token_budget == 0 {
            return Err(Error::InvalidInput("token_budget must be at least 1".into()));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "dedup_threshold must be within (0, 1], got {}",
                self.dedup_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Pack `candidates` (already ranked) into at most `token_budget` tokens.
    pub fn assemble(&self, candidates: &[RetrievedCandidate], token_budget: usize) -> AssembledContext {
        let mut ctx = AssembledContext::default();
        let mut included_words: Vec<HashSet<String>> = Vec::new();
        let mut included_ids: HashSet<&str> = HashSet::new();

        for candidate in candidates {
            let words = word_set(&candidate.chunk.text);
            let duplicate = included_ids.contains(candidate.chunk.id.as_str())
                || included_words
                    .iter()
                    .any(|seen| jaccard(seen, &words) >= self.config.dedup_threshold);
            if duplicate {
                debug!(chunk_id = %candidate.chunk.id, "skipping near-duplicate chunk");
                ctx.deduplicated += 1;
                continue;
            }

            let tokens = candidate.chunk.token_count;
            if ctx.total_token_count + tokens > token_budget {
                ctx.truncated = true;
                break;
            }

            ctx.total_token_count += tokens;
            included_ids.insert(candidate.chunk.id.as_str());
            included_words.push(words);
            ctx.chunks.push(candidate.clone());
        }

        debug!(
            result_count = ctx.chunks.len(),
            token_count = ctx.total_token_count,
            truncated = ctx.truncated,
            deduplicated = ctx.deduplicated,
            "assembled context"
        );
        ctx
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}
