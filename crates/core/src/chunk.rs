use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::document::{SourceDocument, TextChunk};
use crate::error::{DraftError, Result};
use crate::stats::count_tokens;

const CHUNK_VERSION: u32 = 1;
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];
// Initial window for hard cuts; shrunk until it fits the token budget.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: 600,
            overlap_tokens: 90,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_tokens == 0 {
            return Err(DraftError::InvalidInput(
                "chunk target_tokens must be positive".to_string(),
            ));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(DraftError::InvalidInput(format!(
                "chunk overlap_tokens ({}) must be less than target_tokens ({})",
                self.overlap_tokens, self.target_tokens
            )));
        }
        Ok(())
    }

    // Pieces are kept below the budget minus the overlap so that an overlap
    // tail plus one fresh piece normally fits in the next chunk.
    fn piece_limit(&self) -> usize {
        self.target_tokens
            .saturating_sub(self.overlap_tokens)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub chunks: usize,
    pub hard_splits: usize,
    pub reduced_overlaps: usize,
}

impl ChunkStats {
    fn absorb(&mut self, other: ChunkStats) {
        self.chunks += other.chunks;
        self.hard_splits += other.hard_splits;
        self.reduced_overlaps += other.reduced_overlaps;
    }

    pub fn degraded(&self) -> bool {
        self.hard_splits > 0 || self.reduced_overlaps > 0
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedDocument {
    pub chunks: Vec<TextChunk>,
    pub stats: ChunkStats,
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// Chunks every page separately so each chunk carries one page number.
    /// Ordinals continue across pages.
    pub fn chunk_document(&self, document: &SourceDocument) -> ChunkedDocument {
        let mut chunks = Vec::new();
        let mut stats = ChunkStats::default();
        for page in &document.pages {
            let (texts, page_stats) = self.split_with_stats(&page.text);
            stats.absorb(page_stats);
            for text in texts {
                let ordinal = chunks.len();
                chunks.push(TextChunk {
                    chunk_id: stable_chunk_id(&document.document_id, ordinal, CHUNK_VERSION),
                    document_id: document.document_id.clone(),
                    document_title: document.title.clone(),
                    page_number: page.page_number,
                    ordinal,
                    token_count: count_tokens(&text),
                    text,
                });
            }
        }
        if stats.degraded() {
            warn!(
                document = %document.document_id,
                hard_splits = stats.hard_splits,
                reduced_overlaps = stats.reduced_overlaps,
                "chunking fell back to degraded boundaries"
            );
        }
        ChunkedDocument { chunks, stats }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with_stats(text).0
    }

    pub fn split_with_stats(&self, text: &str) -> (Vec<String>, ChunkStats) {
        let mut stats = ChunkStats::default();
        if text.trim().is_empty() {
            return (Vec::new(), stats);
        }
        let mut pieces = Vec::new();
        segment(text, 0, self.config.piece_limit(), 0, &mut pieces, &mut stats);
        let texts = self.assemble(text, &pieces, &mut stats);
        stats.chunks = texts.len();
        (texts, stats)
    }

    fn assemble(&self, text: &str, pieces: &[(usize, usize)], stats: &mut ChunkStats) -> Vec<String> {
        let target = self.config.target_tokens;
        let overlap = self.config.overlap_tokens;
        let fits = |from: usize, to: usize| count_tokens(span(text, pieces, from, to)) <= target;

        let mut out = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;
        while start < pieces.len() {
            let mut end = (start + 1).max(prev_end + 1);
            while end < pieces.len() && fits(start, end + 1) {
                end += 1;
            }
            let chunk = span(text, pieces, start, end);
            if !chunk.is_empty() {
                out.push(chunk.to_string());
            }
            if end == pieces.len() {
                break;
            }
            let mut next = end;
            if overlap > 0 {
                while next > start {
                    let candidate = next - 1;
                    if !fits(candidate, end + 1) {
                        break;
                    }
                    next = candidate;
                    if count_tokens(span(text, pieces, next, end)) >= overlap {
                        break;
                    }
                }
                let shared = if next < end {
                    count_tokens(span(text, pieces, next, end))
                } else {
                    0
                };
                if shared < overlap {
                    stats.reduced_overlaps += 1;
                    debug!(shared, overlap, "overlap reduced to keep chunk within budget");
                }
            }
            start = next;
            prev_end = end;
        }
        out
    }
}

/// Splits `text` into chunk texts of at most `target_tokens` tokens whose
/// neighbours share `overlap_tokens` tokens.
pub fn split_text(text: &str, target_tokens: usize, overlap_tokens: usize) -> Result<Vec<String>> {
    let chunker = Chunker::new(ChunkConfig {
        target_tokens,
        overlap_tokens,
    })?;
    Ok(chunker.split(text))
}

// Collects byte ranges of `text` (offset by `base`), each within `limit`
// tokens, preferring the coarsest separator that exists. Separators stay
// attached to the piece they end, so the ranges tile the input.
fn segment(
    text: &str,
    base: usize,
    limit: usize,
    depth: usize,
    out: &mut Vec<(usize, usize)>,
    stats: &mut ChunkStats,
) {
    if text.is_empty() {
        return;
    }
    if count_tokens(text) <= limit {
        out.push((base, base + text.len()));
        return;
    }
    for (level, separator) in SEPARATORS.iter().enumerate().skip(depth) {
        if !text.contains(*separator) {
            continue;
        }
        let parts: Vec<&str> = text.split_inclusive(*separator).collect();
        if parts.len() < 2 {
            continue;
        }
        let mut offset = base;
        for part in parts {
            segment(part, offset, limit, level + 1, out, stats);
            offset += part.len();
        }
        return;
    }
    stats.hard_splits += 1;
    warn!(
        tokens = count_tokens(text),
        limit, "no separator inside oversized span; hard-splitting"
    );
    hard_split(text, base, limit, out);
}

fn hard_split(text: &str, base: usize, limit: usize, out: &mut Vec<(usize, usize)>) {
    let mut consumed = 0usize;
    while consumed < text.len() {
        let rest = &text[consumed..];
        let min_end = first_char_len(rest);
        let mut end = floor_char_boundary(rest, limit.saturating_mul(CHARS_PER_TOKEN)).max(min_end);
        while end > min_end && count_tokens(&rest[..end]) > limit {
            let shrink = (end / 10).max(1);
            end = floor_char_boundary(rest, end - shrink).max(min_end);
        }
        out.push((base + consumed, base + consumed + end));
        consumed += end;
    }
}

fn span<'a>(text: &'a str, pieces: &[(usize, usize)], from: usize, to: usize) -> &'a str {
    text[pieces[from].0..pieces[to - 1].1].trim()
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(0)
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn stable_chunk_id(document_id: &str, ordinal: usize, version: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(version.to_be_bytes());
    hasher.update((ordinal as u64).to_be_bytes());
    hex::encode(hasher.finalize())
}
