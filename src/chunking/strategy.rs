//! Chunk-method strategies: structural, semantic, and fixed-size.
//!
//! Each strategy proposes a candidate chunk set (or declines); the engine
//! accepts the first proposal that passes the well-sized predicate. Adding a
//! new method means adding one implementor to the chain, nothing else.

use crate::sources::Heading;

use super::tokens::{Span, estimate_tokens, sentence_spans, tokens_for_words, word_count, word_spans};
use super::{ChunkMethod, ChunkerConfig, TextChunk};

/// A candidate-producing chunking strategy.
pub(crate) trait ChunkStrategy: Send + Sync {
    fn method(&self) -> ChunkMethod;

    /// Whether proposals from this strategy bypass the acceptance predicate.
    fn unconditional(&self) -> bool {
        false
    }

    /// Proposes a chunk set, or `None` if the strategy does not apply.
    fn propose(
        &self,
        text: &str,
        headings: &[Heading],
        config: &ChunkerConfig,
    ) -> Option<Vec<TextChunk>>;
}

// ============================================================================
// Structural: split at heading boundaries
// ============================================================================

const MIN_HEADINGS: usize = 2;
const MAX_HEADINGS: usize = 20;
const MIN_DISTINCT_LEVELS: usize = 2;
const MAX_DISTINCT_LEVELS: usize = 4;

/// Splits at heading offsets when the heading hierarchy is good: between 2
/// and 20 headings, 2 to 4 distinct levels, and an average section size of
/// at least `min_chunk_tokens`. Oversized sections are re-split with the
/// semantic method restricted to that section.
pub(crate) struct StructuralStrategy;

impl ChunkStrategy for StructuralStrategy {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::Structural
    }

    fn propose(
        &self,
        text: &str,
        headings: &[Heading],
        config: &ChunkerConfig,
    ) -> Option<Vec<TextChunk>> {
        if !(MIN_HEADINGS..=MAX_HEADINGS).contains(&headings.len()) {
            return None;
        }
        let mut levels: Vec<u8> = headings.iter().map(|h| h.level).collect();
        levels.sort_unstable();
        levels.dedup();
        if !(MIN_DISTINCT_LEVELS..=MAX_DISTINCT_LEVELS).contains(&levels.len()) {
            return None;
        }
        let average_section = estimate_tokens(text) / headings.len();
        if average_section < config.min_chunk_tokens {
            return None;
        }

        let mut boundaries: Vec<usize> = headings
            .iter()
            .map(|h| h.offset)
            .filter(|&offset| offset <= text.len())
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();
        if boundaries.first().copied() != Some(0) {
            boundaries.insert(0, 0);
        }
        boundaries.push(text.len());

        let mut chunks = Vec::new();
        for window in boundaries.windows(2) {
            let (start, end) = (window[0], window[1]);
            let Some(section) = trimmed_span(text, start, end) else {
                continue;
            };
            let slice = section.slice(text);
            if estimate_tokens(slice) <= config.max_chunk_tokens {
                chunks.push(TextChunk {
                    content: slice.to_string(),
                    start: section.start,
                    end: section.end,
                    token_count: estimate_tokens(slice),
                    overlap_tokens: 0,
                });
            } else {
                let mut split = semantic_chunks(slice, section.start, config);
                if split.is_empty() {
                    // No usable sentences in an oversized section: keep it
                    // whole and let the acceptance predicate judge.
                    chunks.push(TextChunk {
                        content: slice.to_string(),
                        start: section.start,
                        end: section.end,
                        token_count: estimate_tokens(slice),
                        overlap_tokens: 0,
                    });
                } else {
                    chunks.append(&mut split);
                }
            }
        }

        if chunks.is_empty() { None } else { Some(chunks) }
    }
}

/// Trims a byte range to its non-whitespace core; `None` if nothing remains.
fn trimmed_span(text: &str, start: usize, end: usize) -> Option<Span> {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = raw.len() - raw.trim_start().len();
    let trail = raw.len() - raw.trim_end().len();
    Some(Span {
        start: start + lead,
        end: end - trail,
    })
}

// ============================================================================
// Semantic: greedy sentence accumulation with break detection
// ============================================================================

/// Sentence prefixes that signal a discourse shift worth breaking on.
const DISCOURSE_MARKERS: &[&str] = &[
    "however",
    "therefore",
    "on the other hand",
    "in contrast",
    "meanwhile",
    "conversely",
    "first",
    "firstly",
    "second",
    "secondly",
    "third",
    "thirdly",
    "next",
    "then",
    "finally",
    "lastly",
    "furthermore",
    "moreover",
    "in conclusion",
    "in summary",
];

/// Jaccard similarity below which adjacent sentences are considered to have
/// drifted to a new topic.
const TOPIC_SHIFT_SIMILARITY: f64 = 0.2;

/// Greedily accumulates sentences, flushing when the next sentence would
/// exceed `max_chunk_tokens`, or when the chunk has reached
/// `min_chunk_tokens` and a semantic break is detected at the next sentence.
pub(crate) struct SemanticStrategy;

impl ChunkStrategy for SemanticStrategy {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::Semantic
    }

    fn propose(
        &self,
        text: &str,
        _headings: &[Heading],
        config: &ChunkerConfig,
    ) -> Option<Vec<TextChunk>> {
        let chunks = semantic_chunks(text, 0, config);
        if chunks.is_empty() { None } else { Some(chunks) }
    }
}

/// Semantic split of `text`, with chunk offsets shifted by `base` so the
/// structural strategy can re-split a section in place.
pub(crate) fn semantic_chunks(text: &str, base: usize, config: &ChunkerConfig) -> Vec<TextChunk> {
    let sentences = sentence_spans(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<Span> = Vec::new();
    let mut current_words = 0usize;

    for &next in &sentences {
        let next_text = next.slice(text);
        let next_words = word_count(next_text);

        if !current.is_empty() {
            let overflow =
                tokens_for_words(current_words + next_words) > config.max_chunk_tokens;
            let breakable = tokens_for_words(current_words) >= config.min_chunk_tokens
                && is_semantic_break(current.last().map(|s| s.slice(text)), next_text);
            if overflow || breakable {
                chunks.push(flush(text, base, &current, current_words));
                current.clear();
                current_words = 0;
            }
        }

        current.push(next);
        current_words += next_words;
    }
    if !current.is_empty() {
        chunks.push(flush(text, base, &current, current_words));
    }
    chunks
}

fn flush(text: &str, base: usize, sentences: &[Span], words: usize) -> TextChunk {
    let content = sentences
        .iter()
        .map(|s| s.slice(text))
        .collect::<Vec<_>>()
        .join(" ");
    TextChunk {
        content,
        start: base + sentences[0].start,
        end: base + sentences[sentences.len() - 1].end,
        token_count: tokens_for_words(words),
        overlap_tokens: 0,
    }
}

/// A break is signaled by a discourse-marker prefix on the next sentence, or
/// by low word-set overlap between the current chunk's last sentence and the
/// next one.
fn is_semantic_break(last_sentence: Option<&str>, next_sentence: &str) -> bool {
    let lowered = next_sentence.trim_start().to_lowercase();
    for marker in DISCOURSE_MARKERS {
        if let Some(rest) = lowered.strip_prefix(marker) {
            if rest.is_empty() || rest.starts_with([' ', ',', ':']) {
                return true;
            }
        }
    }
    match last_sentence {
        Some(last) => jaccard_similarity(last, next_sentence) < TOPIC_SHIFT_SIMILARITY,
        None => false,
    }
}

/// Word-set Jaccard similarity over lowercased, punctuation-stripped words.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

// ============================================================================
// Fixed-size: unconditional word-grouping fallback
// ============================================================================

/// Splits the raw word stream into groups of `floor(target / 1.3)` words.
/// Always well-formed; the chain's terminal fallback.
pub(crate) struct FixedSizeStrategy;

impl ChunkStrategy for FixedSizeStrategy {
    fn method(&self) -> ChunkMethod {
        ChunkMethod::FixedSize
    }

    fn unconditional(&self) -> bool {
        true
    }

    fn propose(
        &self,
        text: &str,
        _headings: &[Heading],
        config: &ChunkerConfig,
    ) -> Option<Vec<TextChunk>> {
        let chunks = fixed_size_chunks(text, config);
        if chunks.is_empty() { None } else { Some(chunks) }
    }
}

pub(crate) fn fixed_size_chunks(text: &str, config: &ChunkerConfig) -> Vec<TextChunk> {
    // floor(target / 1.3), in integer arithmetic
    let words_per_chunk = (config.target_chunk_tokens * 10 / 13).max(1);
    let words = word_spans(text);

    words
        .chunks(words_per_chunk)
        .map(|group| {
            let start = group[0].start;
            let end = group[group.len() - 1].end;
            TextChunk {
                content: text[start..end].to_string(),
                start,
                end,
                token_count: tokens_for_words(group.len()),
                overlap_tokens: 0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    fn heading(text: &str, level: u8, offset: usize) -> Heading {
        Heading {
            text: text.into(),
            level,
            offset,
        }
    }

    #[test]
    fn structural_declines_without_enough_headings() {
        let text = "body ".repeat(2000);
        let headings = vec![heading("Only", 2, 0)];
        assert!(
            StructuralStrategy
                .propose(&text, &headings, &config())
                .is_none()
        );
    }

    #[test]
    fn structural_declines_single_level_hierarchy() {
        let text = "body ".repeat(2000);
        let headings = vec![heading("A", 2, 0), heading("B", 2, 4000)];
        assert!(
            StructuralStrategy
                .propose(&text, &headings, &config())
                .is_none()
        );
    }

    #[test]
    fn structural_declines_thin_sections() {
        // 20 headings over ~200 words: average section far below min.
        let text = "body ".repeat(200);
        let headings: Vec<Heading> = (0..20)
            .map(|i| heading("H", if i % 2 == 0 { 2 } else { 3 }, i * 10))
            .collect();
        assert!(
            StructuralStrategy
                .propose(&text, &headings, &config())
                .is_none()
        );
    }

    #[test]
    fn structural_covers_preamble_before_first_heading() {
        let preamble = "intro ".repeat(500);
        let mut text = preamble.clone();
        let h1 = text.len();
        text.push_str("Part One\n");
        text.push_str(&"alpha ".repeat(500));
        let h2 = text.len();
        text.push_str("Part Two\n");
        text.push_str(&"beta ".repeat(500));

        let headings = vec![heading("Part One", 2, h1), heading("Part Two", 3, h2)];
        let chunks = StructuralStrategy
            .propose(&text, &headings, &config())
            .unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, 0);
        assert!(chunks[0].content.starts_with("intro"));
        assert!(chunks[1].content.starts_with("Part One"));
    }

    #[test]
    fn semantic_flushes_before_exceeding_max() {
        let cfg = ChunkerConfig::default()
            .with_min_chunk_tokens(5)
            .with_max_chunk_tokens(30);
        // Ten sentences of ten words each; similar wording avoids topic breaks.
        let text = (0..10)
            .map(|i| format!("the quick brown fox number {i} jumps over lazy dogs."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = SemanticStrategy.propose(&text, &[], &cfg).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 30, "chunk at {} tokens", chunk.token_count);
        }
    }

    #[test]
    fn semantic_breaks_on_discourse_marker() {
        let cfg = ChunkerConfig::default()
            .with_min_chunk_tokens(10)
            .with_max_chunk_tokens(800);
        let text = "The installation guide covers every supported platform in detail. \
                    The installation guide also covers every optional component flag. \
                    However, the installation guide leaves troubleshooting for later sections.";
        let chunks = SemanticStrategy.propose(text, &[], &cfg).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.starts_with("However"));
    }

    #[test]
    fn semantic_breaks_on_topic_shift() {
        let cfg = ChunkerConfig::default()
            .with_min_chunk_tokens(10)
            .with_max_chunk_tokens(800);
        let text = "Calculus studies continuous change through derivatives and integrals carefully. \
                    Calculus applies derivatives and integrals to continuous functions repeatedly. \
                    Medieval castles defended river crossings with moats and towers.";
        let chunks = SemanticStrategy.propose(text, &[], &cfg).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.starts_with("Medieval"));
    }

    #[test]
    fn semantic_holds_chunks_below_min_through_breaks() {
        // min not reached: discourse markers must not flush.
        let cfg = ChunkerConfig::default()
            .with_min_chunk_tokens(300)
            .with_max_chunk_tokens(800);
        let text = "The overview covers goals and scope for newcomers. \
                    However, the details live in the reference chapters.";
        let chunks = SemanticStrategy.propose(text, &[], &cfg).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn fixed_size_groups_words_by_target() {
        let cfg = ChunkerConfig::default().with_target_chunk_tokens(13);
        // floor(13 / 1.3) = 10 words per chunk
        let text = (0..25).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = fixed_size_chunks(&text, &cfg);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].token_count, 13);
        assert_eq!(chunks[2].token_count, tokens_for_words(5));
        // Spans tile the word stream in order.
        assert!(chunks[0].end <= chunks[1].start);
        assert!(chunks[1].end <= chunks[2].start);
    }

    #[test]
    fn jaccard_similarity_is_word_set_based() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
        let sim = jaccard_similarity("the quick fox", "the slow fox");
        assert!((sim - 0.5).abs() < 1e-9);
    }
}
