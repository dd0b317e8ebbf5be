//! Token-bounded, overlap-stitched chunking of extracted page content.
//!
//! [`ChunkingEngine::chunk`] is a pure, synchronous transformation: it never
//! performs I/O and never fails for well-formed input (degenerate text yields
//! zero chunks, not an error). Method selection runs an ordered strategy
//! chain (structural, then semantic, then an unconditional fixed-size
//! fallback) where each candidate set is judged by a single well-sized
//! acceptance predicate. A trailing overlap pass stitches context across
//! chunk boundaries.

pub mod overlap;
pub mod strategy;
pub mod tokens;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sources::ExtractedContent;
use strategy::{ChunkStrategy, FixedSizeStrategy, SemanticStrategy, StructuralStrategy};
use tokens::estimate_tokens;

/// How a chunk set was produced. Persisted with each chunk; downstream
/// consumers depend on the exact serialized names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMethod {
    Semantic,
    Structural,
    FixedSize,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Structural => "structural",
            Self::FixedSize => "fixed_size",
        }
    }
}

impl std::fmt::Display for ChunkMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "structural" => Ok(Self::Structural),
            "fixed_size" => Ok(Self::FixedSize),
            _ => Err(()),
        }
    }
}

/// Sizing parameters for the chunker.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkerConfig {
    /// Lower bound a chunk should reach before a semantic break may flush it.
    pub min_chunk_tokens: usize,
    /// Preferred chunk size; drives the fixed-size word grouping.
    pub target_chunk_tokens: usize,
    /// Hard ceiling; accumulation flushes before exceeding it.
    pub max_chunk_tokens: usize,
    /// Fraction of the previous chunk's tokens duplicated into the next.
    pub overlap_fraction: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_tokens: 300,
            target_chunk_tokens: 400,
            max_chunk_tokens: 800,
            overlap_fraction: 0.2,
        }
    }
}

impl ChunkerConfig {
    #[must_use]
    pub fn with_min_chunk_tokens(mut self, tokens: usize) -> Self {
        self.min_chunk_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_target_chunk_tokens(mut self, tokens: usize) -> Self {
        self.target_chunk_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_max_chunk_tokens(mut self, tokens: usize) -> Self {
        self.max_chunk_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_overlap_fraction(mut self, fraction: f64) -> Self {
        self.overlap_fraction = fraction;
        self
    }
}

/// One bounded span of a page's text, before embedding and persistence.
///
/// `start` and `end` are byte offsets into the original plain text covering
/// the span the chunk was cut from; the overlap pass prepends text to
/// `content` without moving them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    /// Tokens duplicated from the tail of the previous chunk; zero for the
    /// first chunk and for single-chunk results.
    pub overlap_tokens: usize,
}

/// Summary numbers for one chunking run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStats {
    pub total_chunks: usize,
    pub average_tokens: f64,
    pub oversize_chunks: usize,
    pub undersize_chunks: usize,
}

/// Output of [`ChunkingEngine::chunk`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub chunks: Vec<TextChunk>,
    pub total_tokens: usize,
    pub average_chunk_size: f64,
    pub method: ChunkMethod,
    pub stats: ChunkingStats,
}

/// Pure content-to-chunks transformation.
pub struct ChunkingEngine {
    config: ChunkerConfig,
    strategies: Vec<Box<dyn ChunkStrategy>>,
}

impl ChunkingEngine {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            strategies: vec![
                Box::new(StructuralStrategy),
                Box::new(SemanticStrategy),
                Box::new(FixedSizeStrategy),
            ],
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks one page's extracted content.
    ///
    /// Content that fits within `max_chunk_tokens` short-circuits to a single
    /// full-span chunk with no overlap. Otherwise the strategy chain runs in
    /// order and the first acceptable candidate set wins; the fixed-size
    /// fallback is accepted unconditionally, so a non-empty input always
    /// chunks.
    pub fn chunk(&self, content: &ExtractedContent) -> ChunkingResult {
        let text = content.plain_text.as_str();

        if text.trim().is_empty() {
            debug!(url = %content.source_url, "degenerate content, zero chunks");
            return Self::finish(Vec::new(), ChunkMethod::Semantic, &self.config);
        }

        let total = estimate_tokens(text);
        if total <= self.config.max_chunk_tokens {
            let chunk = TextChunk {
                content: text.to_string(),
                start: 0,
                end: text.len(),
                token_count: total,
                overlap_tokens: 0,
            };
            return Self::finish(vec![chunk], ChunkMethod::Semantic, &self.config);
        }

        for strategy in &self.strategies {
            let Some(candidate) = strategy.propose(text, &content.heading_hierarchy, &self.config)
            else {
                continue;
            };
            if strategy.unconditional() || well_sized(&candidate, &self.config) {
                debug!(
                    url = %content.source_url,
                    method = %strategy.method(),
                    chunks = candidate.len(),
                    "chunk method selected"
                );
                let mut chunks = candidate;
                overlap::apply_overlap(&mut chunks, self.config.overlap_fraction);
                return Self::finish(chunks, strategy.method(), &self.config);
            }
        }

        // The chain ends with the unconditional fixed-size strategy, so this
        // only runs if the strategy list was emptied.
        let mut chunks = strategy::fixed_size_chunks(text, &self.config);
        overlap::apply_overlap(&mut chunks, self.config.overlap_fraction);
        Self::finish(chunks, ChunkMethod::FixedSize, &self.config)
    }

    fn finish(chunks: Vec<TextChunk>, method: ChunkMethod, config: &ChunkerConfig) -> ChunkingResult {
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        let average = if chunks.is_empty() {
            0.0
        } else {
            total_tokens as f64 / chunks.len() as f64
        };
        let stats = ChunkingStats {
            total_chunks: chunks.len(),
            average_tokens: average,
            oversize_chunks: chunks
                .iter()
                .filter(|c| c.token_count > config.max_chunk_tokens)
                .count(),
            undersize_chunks: chunks
                .iter()
                .filter(|c| c.token_count < config.min_chunk_tokens)
                .count(),
        };
        ChunkingResult {
            chunks,
            total_tokens,
            average_chunk_size: average,
            method,
            stats,
        }
    }
}

impl Default for ChunkingEngine {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Acceptance predicate for a candidate chunk set: average tokens per chunk
/// within `[min, max]`, at most 10% of chunks over `max`, at most 20% under
/// `min`.
pub(crate) fn well_sized(chunks: &[TextChunk], config: &ChunkerConfig) -> bool {
    if chunks.is_empty() {
        return false;
    }
    let len = chunks.len() as f64;
    let total: usize = chunks.iter().map(|c| c.token_count).sum();
    let average = total as f64 / len;
    if average < config.min_chunk_tokens as f64 || average > config.max_chunk_tokens as f64 {
        return false;
    }
    let oversize = chunks
        .iter()
        .filter(|c| c.token_count > config.max_chunk_tokens)
        .count() as f64;
    let undersize = chunks
        .iter()
        .filter(|c| c.token_count < config.min_chunk_tokens)
        .count() as f64;
    oversize <= 0.10 * len && undersize <= 0.20 * len
}
