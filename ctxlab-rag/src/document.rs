//! Data types for documents, chunks, and search results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key-value metadata attached to documents, chunks, and search results.
///
/// A `BTreeMap` keeps serialization order stable across runs.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key holding the originating path of a document.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the content-addressed document identifier.
pub const DOC_ID_KEY: &str = "doc_id";
/// Metadata key holding a chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
/// Metadata key holding a chunk's size in tokens.
pub const TOKEN_COUNT_KEY: &str = "token_count";

/// Derive a content-addressed identifier: the hex SHA-256 of the full text.
///
/// Identical content always yields the identical identifier.
pub fn content_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Content-addressed identifier, see [`content_id`].
    pub id: String,
    /// The text content of the document.
    pub content: String,
    /// Metadata such as source path, file type, size and timestamps.
    pub metadata: Metadata,
}

impl Document {
    /// Create a document whose identifier is derived from `content`.
    ///
    /// The identifier is also recorded under the `doc_id` metadata key so that
    /// chunks inherit it.
    pub fn new(content: impl Into<String>, mut metadata: Metadata) -> Self {
        let content = content.into();
        let id = content_id(&content);
        metadata.insert(DOC_ID_KEY.to_string(), Value::String(id.clone()));
        Self { id, content, metadata }
    }

    /// The `source` metadata entry, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(Value::as_str)
    }
}

/// A bounded span of a [`Document`]'s text produced for embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{source}_chunk_{index}` unless supplied explicitly.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Parent metadata plus `chunk_index`, `token_count` and offsets.
    pub metadata: Metadata,
}

impl Chunk {
    /// Position of this chunk within its document.
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.get(CHUNK_INDEX_KEY).and_then(Value::as_u64).map(|v| v as usize)
    }

    /// Size of this chunk in tokens.
    pub fn token_count(&self) -> Option<usize> {
        self.metadata.get(TOKEN_COUNT_KEY).and_then(Value::as_u64).map(|v| v as usize)
    }
}

/// A retrieved record paired with a similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the stored record.
    pub id: String,
    /// Stored text.
    pub text: String,
    /// Stored (primitive-only) metadata.
    pub metadata: Metadata,
    /// Similarity in `[0, 1]`; `1.0` means direct retrieval by id.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_has_identical_id() {
        let a = Document::new("same text", Metadata::new());
        let b = Document::new("same text", Metadata::new());
        let c = Document::new("other text", Metadata::new());
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
        assert_eq!(a.metadata.get(DOC_ID_KEY), Some(&Value::String(a.id.clone())));
    }

    #[test]
    fn chunk_accessors_read_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert(CHUNK_INDEX_KEY.into(), 3.into());
        metadata.insert(TOKEN_COUNT_KEY.into(), 42.into());
        let chunk = Chunk { id: "a_chunk_3".into(), text: "x".into(), metadata };
        assert_eq!(chunk.chunk_index(), Some(3));
        assert_eq!(chunk.token_count(), Some(42));
    }
}
