//! Overlap stitching: duplicate trailing context into the next chunk.

use super::TextChunk;
use super::tokens::{estimate_tokens, tail_words};

/// Prepends trailing words of each chunk into its successor.
///
/// For chunk `i ≥ 1`, the trailing `floor(overlap_fraction ×
/// token_count(chunk[i-1]) / 1.3)` words of chunk `i-1` are prepended (with a
/// separating space), `overlap_tokens` is set to the estimate of that overlap
/// text, and `token_count` grows by the same amount. Overlaps are computed
/// from the pre-pass contents so duplicated text never cascades through
/// successive chunks. Single-chunk and empty lists are left untouched.
pub(crate) fn apply_overlap(chunks: &mut [TextChunk], overlap_fraction: f64) {
    if chunks.len() <= 1 {
        return;
    }

    let originals: Vec<(String, usize)> = chunks
        .iter()
        .map(|c| (c.content.clone(), c.token_count))
        .collect();

    for (i, chunk) in chunks.iter_mut().enumerate().skip(1) {
        let (prev_content, prev_tokens) = &originals[i - 1];
        let take = (overlap_fraction * *prev_tokens as f64 / 1.3).floor() as usize;
        if take == 0 {
            continue;
        }
        let overlap = tail_words(prev_content, take);
        if overlap.is_empty() {
            continue;
        }
        let overlap_tokens = estimate_tokens(&overlap);
        chunk.content = format!("{overlap} {}", chunk.content);
        chunk.overlap_tokens = overlap_tokens;
        chunk.token_count += overlap_tokens;
    }
}
