//! Configuration for chunking, embedding and retrieval.

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingStrategy;
use crate::error::{RagError, Result};

/// Configuration parameters for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// How documents are split.
    pub chunking_strategy: ChunkingStrategy,
    /// Maximum chunk size in tokens.
    pub chunk_size: usize,
    /// Tokens shared by consecutive fixed-size chunks. Ignored by sentence chunking.
    pub chunk_overlap: usize,
    /// Sentences carried into the next sentence-based chunk.
    pub overlap_sentences: usize,
    /// Number of candidates fetched from vector search.
    pub top_k: usize,
    /// Minimum similarity for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Embedding model name.
    pub embedding_model: String,
    /// Vectors cached per embedding model.
    pub embedding_cache_size: usize,
    /// Embedding models kept resident at once.
    pub max_cached_models: usize,
    /// Vector store collection name.
    pub collection: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking_strategy: ChunkingStrategy::FixedSize,
            chunk_size: 512,
            chunk_overlap: 50,
            overlap_sentences: 1,
            top_k: 5,
            similarity_threshold: 0.0,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_cache_size: 1000,
            max_cached_models: 2,
            collection: "documents".to_string(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check every parameter and return one message per problem.
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.chunk_size == 0 {
            errors.push("chunk_size must be greater than zero".to_string());
        }
        if self.chunking_strategy == ChunkingStrategy::FixedSize
            && self.chunk_overlap >= self.chunk_size
        {
            errors.push(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            errors.push("top_k must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            errors.push(format!(
                "similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            ));
        }
        if self.embedding_model.trim().is_empty() {
            errors.push("embedding_model must not be empty".to_string());
        }
        if self.embedding_cache_size == 0 {
            errors.push("embedding_cache_size must be greater than zero".to_string());
        }
        if self.max_cached_models == 0 {
            errors.push("max_cached_models must be greater than zero".to_string());
        }
        if self.collection.trim().is_empty() {
            errors.push("collection must not be empty".to_string());
        }
        errors
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the chunking strategy.
    pub fn chunking_strategy(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking_strategy = strategy;
        self
    }

    /// Set the maximum chunk size in tokens.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive fixed-size chunks in tokens.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the sentence overlap for sentence-based chunking.
    pub fn overlap_sentences(mut self, sentences: usize) -> Self {
        self.config.overlap_sentences = sentences;
        self
    }

    /// Set the number of top results to fetch from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the embedding model name.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the per-model embedding cache capacity.
    pub fn embedding_cache_size(mut self, size: usize) -> Self {
        self.config.embedding_cache_size = size;
        self
    }

    /// Set how many embedding models may stay resident.
    pub fn max_cached_models(mut self, max: usize) -> Self {
        self.config.max_cached_models = max;
        self
    }

    /// Set the vector store collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] listing every problem found by
    /// [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(RagError::ConfigError(errors.join("; ")));
        }
        Ok(self.config)
    }
}
