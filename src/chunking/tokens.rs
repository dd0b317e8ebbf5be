//! Token estimation and text scanning primitives.
//!
//! Token counts everywhere in the pipeline come from one heuristic:
//! `ceil(word_count × 1.3)`, where words are non-empty whitespace-separated
//! fragments. It is an approximate proxy for model input cost, not an exact
//! tokenizer count, and it must stay consistent across chunk sizing, overlap
//! accounting, and stored `token_count` fields.

/// A byte range into a source string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Estimated token count: `ceil(word_count × 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_words(word_count(text))
}

/// Token estimate for a known word count, avoiding a rescan.
pub fn tokens_for_words(words: usize) -> usize {
    // ceil(words * 1.3) in integer arithmetic
    (words * 13).div_ceil(10)
}

/// Number of non-empty whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte spans of every word in `text`, in order.
pub fn word_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(Span { start: s, end: idx });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push(Span {
            start: s,
            end: text.len(),
        });
    }
    spans
}

/// Minimum character length for a fragment to count as a sentence.
const MIN_SENTENCE_CHARS: usize = 10;

/// Byte spans of sentences, split on `.`, `!`, and `?`.
///
/// Fragments whose trimmed length is at most [`MIN_SENTENCE_CHARS`] are
/// discarded; list markers and abbreviations rarely carry enough signal to
/// chunk on. Spans are trimmed of surrounding whitespace and include the
/// terminating punctuation.
pub fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = idx + ch.len_utf8();
            push_sentence(text, start, end, &mut spans);
            start = end;
        }
    }
    push_sentence(text, start, text.len(), &mut spans);
    spans
}

fn push_sentence(text: &str, start: usize, end: usize, spans: &mut Vec<Span>) {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MIN_SENTENCE_CHARS {
        return;
    }
    let lead = raw.len() - raw.trim_start().len();
    let trail = raw.len() - raw.trim_end().len();
    spans.push(Span {
        start: start + lead,
        end: end - trail,
    });
}

/// The trailing `n` words of `text`, joined by single spaces.
pub fn tail_words(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let skip = words.len().saturating_sub(n);
    words[skip..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_ceil_of_word_count_times_1_3() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n\t "), 0);
        // 1 word -> ceil(1.3) = 2
        assert_eq!(estimate_tokens("hello"), 2);
        // 10 words -> exactly 13
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
        // 3 words -> ceil(3.9) = 4
        assert_eq!(estimate_tokens("one  two\nthree"), 4);
        // 100 words -> 130
        let hundred = vec!["w"; 100].join(" ");
        assert_eq!(estimate_tokens(&hundred), 130);
    }

    #[test]
    fn word_spans_cover_words_exactly() {
        let text = "  alpha beta\n gamma ";
        let spans = word_spans(text);
        let words: Vec<&str> = spans.iter().map(|s| s.slice(text)).collect();
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn sentence_spans_discard_short_fragments() {
        let text = "Ok. This sentence is long enough to keep! Hm? Another keeper follows here.";
        let spans = sentence_spans(text);
        let sentences: Vec<&str> = spans.iter().map(|s| s.slice(text)).collect();
        assert_eq!(
            sentences,
            vec![
                "This sentence is long enough to keep!",
                "Another keeper follows here."
            ]
        );
    }

    #[test]
    fn sentence_spans_keep_unterminated_tail() {
        let text = "A full sentence here. and then a trailing clause without punctuation";
        let spans = sentence_spans(text);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn tail_words_takes_last_n() {
        assert_eq!(tail_words("one two three four", 2), "three four");
        assert_eq!(tail_words("one two", 5), "one two");
        assert_eq!(tail_words("one two", 0), "");
    }
}
