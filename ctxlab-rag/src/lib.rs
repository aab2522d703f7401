//! Retrieval building blocks for ctxlab experiments.
//!
//! This crate provides:
//! - Token-aware chunking (fixed windows and sentence packing)
//! - Content-addressed document loading
//! - LRU-cached embedding services with bounded model residency
//! - A vector store contract with an in-memory index
//! - A small ingest/query pipeline tying them together

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod embedding_cache;
pub mod error;
pub mod inmemory;
pub mod loader;
pub mod pipeline;
pub mod tokenizer;
pub mod vectorstore;

pub use chunking::{
    Chunker, ChunkingStrategy, FixedSizeChunker, SentenceChunker, build_chunker, chunk_text,
    split_sentences,
};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Document, Metadata, SearchResult, content_id};
pub use embedding::{EmbeddingModelLoader, EmbeddingProvider};
pub use embedding_cache::{CacheStats, CachedEmbeddingService, EmbeddingServiceCache};
pub use error::{RagError, Result};
pub use inmemory::InMemoryIndex;
pub use loader::{DocumentLoader, LoadFailure, LoadReport, SUPPORTED_EXTENSIONS};
pub use pipeline::{RagPipeline, RagPipelineBuilder};
pub use tokenizer::{RegexTokenizer, TokenSpan, Tokenizer};
pub use vectorstore::{
    IndexMetadata, IndexRecord, MetadataFilter, MetadataValue, QueryResponse, StoreStats,
    VectorIndex, VectorStore, VectorStoreRegistry, VectorStoreSettings, sanitize_metadata,
};
