//! Boundary-aware text chunker with overlap.
//!
//! Splits a [`Document`]'s normalized text into [`Chunk`]s whose token
//! count never exceeds `max_tokens`. Split points are chosen in order of
//! preference:
//!
//! 1. the last paragraph break (`\n\n`) inside the window that leaves at
//!    least `min_tokens` in the chunk,
//! 2. the last sentence break (`.`, `!`, `?` or a newline followed by
//!    whitespace) under the same condition,
//! 3. the last word boundary inside the window,
//! 4. a hard cut at the window edge.
//!
//! Windows are measured in characters, the unit [`estimate_tokens`]
//! counts, so multibyte text gets the same chunk sizes as ASCII.
//!
//! Consecutive chunks overlap by roughly `overlap_ratio × max_tokens`,
//! snapped forward to the next word start. Every chunk records its byte
//! span in the normalized text, so the chunks always cover the whole
//! document without gaps.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use support_rag_core::chunk::{Chunker, ChunkerConfig};
//! use support_rag_core::models::{Document, SourceType};
//!
//! let doc = Document {
//!     id: "t-1".into(),
//!     source_type: SourceType::Ticket,
//!     text: "I was charged twice.\n\nPlease refund one charge.".into(),
//!     created_at: Utc::now(),
//!     customer_id: "cust-1".into(),
//! };
//! let chunks = Chunker::new(ChunkerConfig::default()).chunk(&doc).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].position, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text` (4 chars ≈ 1 token, rounded up).
///
/// Shared by the chunker and the context assembler so both sides of the
/// budget use the same unit.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Chunk sizing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    /// Lower bound for non-final chunks when the text allows it.
    pub min_tokens: usize,
    /// Fraction of `max_tokens` repeated at the start of the next chunk.
    pub overlap_ratio: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            min_tokens: 32,
            overlap_ratio: 0.15,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("chunking.max_tokens must be > 0".into()));
        }
        if self.min_tokens > self.max_tokens {
            return Err(Error::InvalidInput(
                "chunking.min_tokens must be <= chunking.max_tokens".into(),
            ));
        }
        if !(0.0..=0.5).contains(&self.overlap_ratio) {
            return Err(Error::InvalidInput(
                "chunking.overlap_ratio must be in [0.0, 0.5]".into(),
            ));
        }
        Ok(())
    }
}

/// Splits documents into chunks. Deterministic for a given config.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strength {
    Sentence,
    Paragraph,
}

#[derive(Debug, Clone, Copy)]
struct Boundary {
    /// Byte offset of the first character after the break.
    pos: usize,
    strength: Strength,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `document` into chunks with contiguous positions from 0.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyDocument`] when the text is empty after normalization.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let text = normalize_text(&document.text);
        if text.is_empty() {
            return Err(Error::EmptyDocument {
                document_id: document.id.clone(),
            });
        }

        let max_chars = self.config.max_tokens.max(1) * CHARS_PER_TOKEN;
        let min_chars = self.config.min_tokens * CHARS_PER_TOKEN;
        let overlap_chars = (max_chars as f64 * self.config.overlap_ratio) as usize;
        let boundaries = find_boundaries(&text);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;

        loop {
            let end = self.pick_end(&text, &boundaries, start, prev_end, max_chars, min_chars);
            let overlap = prev_end.saturating_sub(start);
            chunks.push(make_chunk(
                &document.id,
                chunks.len(),
                &text,
                start,
                end,
                overlap,
            ));

            if end >= text.len() {
                break;
            }
            start = next_start(&text, start, end, overlap_chars);
            prev_end = end;
        }

        Ok(chunks)
    }

    /// Choose the end of the chunk beginning at `start`.
    ///
    /// The end always lies strictly past `prev_end`, so every chunk adds
    /// new text even when it starts inside the previous one.
    fn pick_end(
        &self,
        text: &str,
        boundaries: &[Boundary],
        start: usize,
        prev_end: usize,
        max_chars: usize,
        min_chars: usize,
    ) -> usize {
        let limit = advance_chars(text, start, max_chars);
        if limit >= text.len() {
            return text.len();
        }

        let floor = prev_end.max(start);
        let min_end = advance_chars(text, start, min_chars);

        let in_window = |b: &&Boundary| b.pos > floor && b.pos <= limit && b.pos >= min_end;

        if let Some(b) = boundaries
            .iter()
            .filter(in_window)
            .filter(|b| b.strength == Strength::Paragraph)
            .last()
        {
            return b.pos;
        }
        if let Some(b) = boundaries.iter().filter(in_window).last() {
            return b.pos;
        }

        // Word boundary: first character after the last whitespace run.
        if floor < limit {
            if let Some(idx) = text[floor..limit].rfind(char::is_whitespace) {
                let ws = floor + idx;
                let pos = ws + text[ws..].chars().next().map_or(1, char::len_utf8);
                if pos > floor {
                    return pos;
                }
            }
        }

        limit.max(next_char_boundary(text, floor))
    }
}

/// Normalize line endings and trim surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Locate paragraph and sentence breaks in `text`.
fn find_boundaries(text: &str) -> Vec<Boundary> {
    let mut boundaries = Vec::new();
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !matches!(c, '.' | '!' | '?' | '\n') {
            continue;
        }
        let mut end = i + c.len_utf8();
        let mut newlines = usize::from(c == '\n');
        let mut saw_whitespace = c == '\n';
        while let Some(&(j, d)) = iter.peek() {
            if !d.is_whitespace() {
                break;
            }
            if d == '\n' {
                newlines += 1;
            }
            saw_whitespace = true;
            end = j + d.len_utf8();
            iter.next();
        }
        if saw_whitespace && end < text.len() {
            let strength = if newlines >= 2 {
                Strength::Paragraph
            } else {
                Strength::Sentence
            };
            boundaries.push(Boundary { pos: end, strength });
        }
    }

    boundaries
}

/// Start of the chunk following one spanning `[start, end)`.
fn next_start(text: &str, start: usize, end: usize, overlap_chars: usize) -> usize {
    if overlap_chars == 0 {
        return end;
    }
    let candidate = retreat_chars(text, end, overlap_chars).max(next_char_boundary(text, start));
    if candidate >= end {
        return end;
    }

    let after_whitespace = text[..candidate]
        .chars()
        .next_back()
        .is_some_and(char::is_whitespace);
    let on_word = text[candidate..]
        .chars()
        .next()
        .is_some_and(|c| !c.is_whitespace());
    if after_whitespace && on_word {
        return candidate;
    }

    // Snap forward to the next word start, never past `end`.
    match text[candidate..end].find(char::is_whitespace) {
        Some(idx) => {
            let ws = candidate + idx;
            text[ws..end]
                .char_indices()
                .find(|(_, c)| !c.is_whitespace())
                .map_or(end, |(off, _)| ws + off)
        }
        None => end,
    }
}

/// Byte index `n` characters past `from`, clamped to the end of `s`.
fn advance_chars(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(offset, _)| from + offset)
}

/// Byte index `n` characters before `to`, clamped to 0.
fn retreat_chars(s: &str, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    s[..to]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}

/// Byte index just past the character starting at or after `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map_or(s.len(), |c| index + c.len_utf8())
}

/// Deterministic chunk id for `(document_id, position)`.
pub fn chunk_id(document_id: &str, position: usize) -> String {
    let name = format!("{}:{}", document_id, position);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 of `text`, hex-encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    document_id: &str,
    position: usize,
    text: &str,
    start: usize,
    end: usize,
    overlap: usize,
) -> Chunk {
    let body = text[start..end].trim();
    Chunk {
        id: chunk_id(document_id, position),
        document_id: document_id.to_string(),
        position,
        text: body.to_string(),
        start,
        end,
        overlap,
        token_count: estimate_tokens(body),
        hash: hash_text(body),
    }
}
