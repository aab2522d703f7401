//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two token-aware implementations:
//!
//! - [`FixedSizeChunker`]: slides a window of `chunk_size` tokens with `chunk_overlap` tokens of overlap
//! - [`SentenceChunker`]: packs whole sentences up to `chunk_size` tokens with sentence-level overlap
//!
//! Both are deterministic: the same text, metadata and parameters always produce
//! the same chunks in the same `chunk_index` order.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{CHUNK_INDEX_KEY, Chunk, DOC_ID_KEY, Document, Metadata, SOURCE_KEY, TOKEN_COUNT_KEY};
use crate::error::{RagError, Result};
use crate::tokenizer::{RegexTokenizer, Tokenizer, decode_window};

/// How a document is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Token windows of fixed width.
    #[default]
    FixedSize,
    /// Whole sentences packed up to the token budget.
    Sentence,
}

impl ChunkingStrategy {
    /// Names accepted by [`FromStr`].
    pub const VALID: [&'static str; 2] = ["fixed_size", "sentence"];

    /// Canonical name of this strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedSize => "fixed_size",
            Self::Sentence => "sentence",
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_size" | "fixed" => Ok(Self::FixedSize),
            "sentence" => Ok(Self::Sentence),
            other => Err(RagError::UnknownStrategy {
                name: other.to_string(),
                valid: Self::VALID.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }
}

/// A strategy for splitting text into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata; embeddings are
/// computed later by the vector store.
pub trait Chunker: Send + Sync {
    /// Split `text` into chunks, copying `metadata` into each one.
    ///
    /// Returns an empty `Vec` for empty or whitespace-only text.
    fn chunk_text(&self, text: &str, metadata: &Metadata) -> Vec<Chunk>;

    /// Split a loaded document into chunks.
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.chunk_text(&document.content, &document.metadata)
    }

    /// The strategy this chunker implements.
    fn strategy(&self) -> ChunkingStrategy;
}

/// Split `text` with the given strategy and parameters.
///
/// For [`ChunkingStrategy::Sentence`], `overlap` counts sentences rather than tokens.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if the parameters are invalid for the strategy.
pub fn chunk_text(
    strategy: ChunkingStrategy,
    text: &str,
    metadata: &Metadata,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let chunker: Box<dyn Chunker> = match strategy {
        ChunkingStrategy::FixedSize => Box::new(FixedSizeChunker::new(chunk_size, overlap)?),
        ChunkingStrategy::Sentence => Box::new(SentenceChunker::new(chunk_size, overlap)?),
    };
    Ok(chunker.chunk_text(text, metadata))
}

/// Build a chunker for `strategy`, sharing `tokenizer`.
pub fn build_chunker(
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
    overlap_sentences: usize,
    tokenizer: Arc<dyn Tokenizer>,
) -> Result<Arc<dyn Chunker>> {
    Ok(match strategy {
        ChunkingStrategy::FixedSize => {
            Arc::new(FixedSizeChunker::new(chunk_size, chunk_overlap)?.with_tokenizer(tokenizer))
        }
        ChunkingStrategy::Sentence => {
            Arc::new(SentenceChunker::new(chunk_size, overlap_sentences)?.with_tokenizer(tokenizer))
        }
    })
}

/// Token windows `[start, end)` over `len` tokens.
///
/// The window advances by `size - overlap` until it reaches the final token.
/// Callers guarantee `overlap < size`.
fn token_windows(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let step = size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        windows.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    windows
}

/// Identifier prefix for chunks: the document source, falling back to its id.
fn chunk_id_prefix(metadata: &Metadata) -> &str {
    metadata
        .get(SOURCE_KEY)
        .or_else(|| metadata.get(DOC_ID_KEY))
        .and_then(Value::as_str)
        .unwrap_or("document")
}

/// Trim a byte range of `text` down to its non-whitespace content.
fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = range.start + (slice.len() - slice.trim_start().len());
    Some(start..start + trimmed.len())
}

/// Assemble a chunk with inherited metadata and positional fields.
fn make_chunk(
    text: String,
    span: Range<usize>,
    token_count: usize,
    index: usize,
    strategy: ChunkingStrategy,
    base: &Metadata,
) -> Chunk {
    let mut metadata = base.clone();
    metadata.insert(CHUNK_INDEX_KEY.to_string(), index.into());
    metadata.insert(TOKEN_COUNT_KEY.to_string(), token_count.into());
    metadata.insert("start_char".to_string(), span.start.into());
    metadata.insert("end_char".to_string(), span.end.into());
    metadata.insert("chunking_strategy".to_string(), strategy.as_str().into());
    Chunk { id: format!("{}_chunk_{index}", chunk_id_prefix(base)), text, metadata }
}

/// Window `text[span]` into token chunks, appending to `out`.
///
/// `extra` is merged into every produced chunk's metadata.
#[allow(clippy::too_many_arguments)]
fn push_token_windows(
    tokenizer: &dyn Tokenizer,
    text: &str,
    span: Range<usize>,
    size: usize,
    overlap: usize,
    strategy: ChunkingStrategy,
    base: &Metadata,
    extra: &Metadata,
    out: &mut Vec<Chunk>,
) {
    let piece = &text[span.clone()];
    let tokens = tokenizer.encode(piece);
    for (sub_index, (from, to)) in token_windows(tokens.len(), size, overlap).into_iter().enumerate() {
        let Some((_, window)) = decode_window(piece, &tokens, from, to) else {
            continue;
        };
        let Some(trimmed) = trim_range(piece, window) else {
            continue;
        };
        let absolute = span.start + trimmed.start..span.start + trimmed.end;
        let mut chunk = make_chunk(
            piece[trimmed].to_string(),
            absolute,
            to - from,
            out.len(),
            strategy,
            base,
        );
        for (key, value) in extra {
            chunk.metadata.insert(key.clone(), value.clone());
        }
        if !extra.is_empty() {
            chunk.metadata.insert("sub_chunk_index".to_string(), sub_index.into());
        }
        out.push(chunk);
    }
}

/// Splits text into token windows of `chunk_size` with `chunk_overlap` tokens of overlap.
///
/// Chunk IDs are generated as `{source}_chunk_{chunk_index}`. Each chunk inherits
/// the parent metadata plus `chunk_index`, `token_count`, `start_char` and `end_char`.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 32)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl fmt::Debug for FixedSizeChunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedSizeChunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish_non_exhaustive()
    }
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker` using the default [`RegexTokenizer`].
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of tokens per chunk
    /// * `chunk_overlap`: number of tokens shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap, tokenizer: Arc::new(RegexTokenizer) })
    }

    /// Replace the tokenizer used for size accounting.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk_text(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        push_token_windows(
            self.tokenizer.as_ref(),
            text,
            0..text.len(),
            self.chunk_size,
            self.chunk_overlap,
            ChunkingStrategy::FixedSize,
            metadata,
            &Metadata::new(),
            &mut chunks,
        );
        chunks
    }

    fn strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::FixedSize
    }
}

const TERMINALS: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 6] = ['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Split text into sentence byte ranges at terminal punctuation followed by whitespace.
///
/// Trailing quotes and brackets stay with their sentence. Ranges are trimmed and
/// never empty.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !TERMINALS.contains(&c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if TERMINALS.contains(&next) || CLOSERS.contains(&next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            sentences.extend(trim_range(text, start..end));
            start = end;
        }
    }
    if start < text.len() {
        sentences.extend(trim_range(text, start..text.len()));
    }
    sentences
}

/// Packs whole sentences into chunks of at most `chunk_size` tokens.
///
/// When the next sentence would overflow the budget, the current chunk is emitted
/// and the next one is seeded with the last `overlap_sentences` sentences. A single
/// sentence longer than `chunk_size` is split on its own with token windows; its
/// token overlap is approximated as `overlap_sentences * chunk_size / 10`, capped
/// at a quarter of `chunk_size`. No overlap carries past an oversized sentence.
///
/// # Example
///
/// ```rust,ignore
/// use ctxlab_rag::SentenceChunker;
///
/// let chunker = SentenceChunker::new(128, 1)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
    overlap_sentences: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl fmt::Debug for SentenceChunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentenceChunker")
            .field("chunk_size", &self.chunk_size)
            .field("overlap_sentences", &self.overlap_sentences)
            .finish_non_exhaustive()
    }
}

impl SentenceChunker {
    /// Create a new `SentenceChunker` using the default [`RegexTokenizer`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size == 0`.
    pub fn new(chunk_size: usize, overlap_sentences: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        Ok(Self { chunk_size, overlap_sentences, tokenizer: Arc::new(RegexTokenizer) })
    }

    /// Replace the tokenizer used for size accounting.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Token overlap used when windowing an oversized sentence.
    pub fn oversized_overlap(&self) -> usize {
        let estimate = self.overlap_sentences.saturating_mul(self.chunk_size / 10);
        estimate.min(self.chunk_size / 4).min(self.chunk_size - 1)
    }

    fn joined(text: &str, group: &[Range<usize>]) -> String {
        group.iter().map(|r| &text[r.clone()]).collect::<Vec<_>>().join(" ")
    }

    fn group_tokens(&self, text: &str, group: &[Range<usize>]) -> usize {
        self.tokenizer.count(&Self::joined(text, group))
    }

    fn emit(&self, text: &str, group: &[Range<usize>], metadata: &Metadata, out: &mut Vec<Chunk>) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            return;
        };
        let joined = Self::joined(text, group);
        let token_count = self.tokenizer.count(&joined);
        let mut chunk = make_chunk(
            joined,
            first.start..last.end,
            token_count,
            out.len(),
            ChunkingStrategy::Sentence,
            metadata,
        );
        chunk.metadata.insert("sentence_count".to_string(), group.len().into());
        out.push(chunk);
    }
}

impl Chunker for SentenceChunker {
    fn chunk_text(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<Range<usize>> = Vec::new();

        for sentence in split_sentences(text) {
            let sentence_tokens = self.tokenizer.count(&text[sentence.clone()]);

            if sentence_tokens > self.chunk_size {
                self.emit(text, &current, metadata, &mut chunks);
                current.clear();
                let mut extra = Metadata::new();
                extra.insert("oversized_sentence".to_string(), true.into());
                push_token_windows(
                    self.tokenizer.as_ref(),
                    text,
                    sentence,
                    self.chunk_size,
                    self.oversized_overlap(),
                    ChunkingStrategy::Sentence,
                    metadata,
                    &extra,
                    &mut chunks,
                );
                continue;
            }

            if !current.is_empty() {
                let mut candidate = current.clone();
                candidate.push(sentence.clone());
                if self.group_tokens(text, &candidate) > self.chunk_size {
                    self.emit(text, &current, metadata, &mut chunks);
                    let keep = self.overlap_sentences.min(current.len());
                    current.drain(..current.len() - keep);
                    // Shed seed sentences until the incoming sentence fits.
                    while !current.is_empty() {
                        let mut candidate = current.clone();
                        candidate.push(sentence.clone());
                        if self.group_tokens(text, &candidate) <= self.chunk_size {
                            break;
                        }
                        current.remove(0);
                    }
                }
            }
            current.push(sentence);
        }

        self.emit(text, &current, metadata, &mut chunks);
        chunks
    }

    fn strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::Sentence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert(SOURCE_KEY.to_string(), source.into());
        m
    }

    #[test]
    fn windows_advance_by_size_minus_overlap() {
        assert_eq!(token_windows(10, 4, 1), vec![(0, 4), (3, 7), (6, 10)]);
        assert_eq!(token_windows(3, 4, 1), vec![(0, 3)]);
        assert_eq!(token_windows(0, 4, 1), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn fixed_rejects_overlap_not_below_size() {
        assert!(matches!(FixedSizeChunker::new(10, 10), Err(RagError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(0, 0), Err(RagError::ConfigError(_))));
        assert!(FixedSizeChunker::new(10, 9).is_ok());
    }

    #[test]
    fn fixed_whitespace_only_yields_nothing() {
        let chunker = FixedSizeChunker::new(8, 2).unwrap();
        assert!(chunker.chunk_text("", &Metadata::new()).is_empty());
        assert!(chunker.chunk_text("   \n\t ", &Metadata::new()).is_empty());
    }

    #[test]
    fn fixed_ids_and_metadata() {
        let chunker = FixedSizeChunker::new(4, 1).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunker.chunk_text(text, &meta("notes.txt"));
        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("notes.txt_chunk_{i}"));
            assert_eq!(chunk.chunk_index(), Some(i));
            assert!(chunk.token_count().unwrap() <= 4);
            assert_eq!(chunk.metadata.get(SOURCE_KEY), Some(&Value::from("notes.txt")));
            let start = chunk.metadata["start_char"].as_u64().unwrap() as usize;
            let end = chunk.metadata["end_char"].as_u64().unwrap() as usize;
            assert_eq!(&text[start..end], chunk.text);
        }
        assert_eq!(chunks[0].text, "alpha beta gamma delta");
        assert_eq!(chunks[1].text, "delta epsilon zeta eta");
    }

    #[test]
    fn split_sentences_keeps_decimals_and_closers() {
        let text = "Pi is 3.14. \"Really?\" Yes!  Done";
        let pieces: Vec<&str> = split_sentences(text).into_iter().map(|r| &text[r]).collect();
        assert_eq!(pieces, vec!["Pi is 3.14.", "\"Really?\"", "Yes!", "Done"]);
    }

    #[test]
    fn sentence_chunks_pack_whole_sentences_with_overlap() {
        let chunker = SentenceChunker::new(8, 1).unwrap();
        let text = "One two three. Four five six. Seven eight nine. Ten eleven twelve.";
        let chunks = chunker.chunk_text(text, &meta("s.txt"));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "One two three. Four five six.");
        assert_eq!(chunks[1].text, "Four five six. Seven eight nine.");
        assert_eq!(chunks[2].text, "Seven eight nine. Ten eleven twelve.");
        for chunk in &chunks {
            assert!(chunk.token_count().unwrap() <= 8);
        }
    }

    #[test]
    fn oversized_sentence_is_windowed_and_resets_overlap() {
        let chunker = SentenceChunker::new(10, 2).unwrap();
        let long = "a b c d e f g h i j k l m n o p q r s t u v w x y z.";
        let text = format!("Short one. {long} Tail sentence here.");
        let chunks = chunker.chunk_text(&text, &meta("o.txt"));

        assert_eq!(chunks[0].text, "Short one.");
        let oversized: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.metadata.get("oversized_sentence") == Some(&Value::Bool(true)))
            .collect();
        assert!(oversized.len() >= 2);
        for chunk in &oversized {
            assert!(chunk.token_count().unwrap() <= 10);
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.text, "Tail sentence here.");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index(), Some(i));
        }
    }

    #[test]
    fn oversized_overlap_is_capped() {
        assert_eq!(SentenceChunker::new(100, 1).unwrap().oversized_overlap(), 10);
        assert_eq!(SentenceChunker::new(100, 5).unwrap().oversized_overlap(), 25);
        assert_eq!(SentenceChunker::new(3, 4).unwrap().oversized_overlap(), 0);
        assert_eq!(SentenceChunker::new(1, 9).unwrap().oversized_overlap(), 0);
    }

    #[test]
    fn strategy_parsing_names_alternatives() {
        assert_eq!("sentence".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::Sentence);
        assert_eq!("Fixed".parse::<ChunkingStrategy>().unwrap(), ChunkingStrategy::FixedSize);
        let err = "semantic".parse::<ChunkingStrategy>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("fixed_size") && message.contains("sentence"));
    }

    #[test]
    fn chunk_text_is_deterministic() {
        let text = "Rust is fast. It is also safe! Does it compile? Usually.";
        let a = chunk_text(ChunkingStrategy::Sentence, text, &meta("d"), 6, 1).unwrap();
        let b = chunk_text(ChunkingStrategy::Sentence, text, &meta("d"), 6, 1).unwrap();
        assert_eq!(a, b);
    }
}
