//! Token-level text segmentation used for size accounting.
//!
//! Chunk sizes are expressed in tokens. A [`Tokenizer`] reports each token as
//! a byte span into the input, so decoding a token window back to text is a
//! plain substring and chunk offsets fall out of the same spans.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// BPE-style pre-tokenization: contractions, letter runs with an optional
/// leading space, digit runs, punctuation runs, whitespace runs.
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(?:s|t|re|ve|m|ll|d)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+")
        .expect("token pattern is valid")
});

/// A token as a byte range of the encoded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    /// Inclusive byte offset.
    pub start: usize,
    /// Exclusive byte offset.
    pub end: usize,
}

impl TokenSpan {
    /// The byte range covered by this token.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Splits text into tokens.
pub trait Tokenizer: Send + Sync {
    /// Encode `text` into contiguous, ordered token spans.
    fn encode(&self, text: &str) -> Vec<TokenSpan>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Decode the token window `tokens[from..to]` back to the text it covers.
///
/// Returns `None` for an empty window.
pub fn decode_window<'a>(
    text: &'a str,
    tokens: &[TokenSpan],
    from: usize,
    to: usize,
) -> Option<(&'a str, Range<usize>)> {
    if from >= to || to > tokens.len() {
        return None;
    }
    let range = tokens[from].start..tokens[to - 1].end;
    Some((&text[range.clone()], range))
}

/// The default regex-driven tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexTokenizer;

impl RegexTokenizer {
    /// Create a new tokenizer.
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for RegexTokenizer {
    fn encode(&self, text: &str) -> Vec<TokenSpan> {
        TOKEN_PATTERN.find_iter(text).map(|m| TokenSpan { start: m.start(), end: m.end() }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_cover_the_whole_input() {
        let text = "Hello, world! It's 2024 — naïve café.\n\nDone";
        let tokens = RegexTokenizer.encode(text);
        assert_eq!(tokens.first().map(|t| t.start), Some(0));
        assert_eq!(tokens.last().map(|t| t.end), Some(text.len()));
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn words_carry_leading_space() {
        let text = "the quick fox";
        let tokens = RegexTokenizer.encode(text);
        let pieces: Vec<&str> = tokens.iter().map(|t| &text[t.range()]).collect();
        assert_eq!(pieces, vec!["the", " quick", " fox"]);
    }

    #[test]
    fn decode_window_returns_substring() {
        let text = "one two three four";
        let tokens = RegexTokenizer.encode(text);
        let (window, range) = decode_window(text, &tokens, 1, 3).unwrap();
        assert_eq!(window, " two three");
        assert_eq!(range, 3..13);
        assert!(decode_window(text, &tokens, 2, 2).is_none());
    }

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(RegexTokenizer.count(""), 0);
    }
}
