//! Ingest-and-query orchestrator.
//!
//! The [`RagPipeline`] wires the raw-document data flow together:
//! [`DocumentLoader`] → [`Chunker`] → [`VectorStore`] (which embeds through its
//! cached embedding service), and answers queries against the same store.
//!
//! # Example
//!
//! ```rust,ignore
//! use ctxlab_rag::{RagPipeline, RagConfig};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .vector_store(store)
//!     .build()?;
//!
//! pipeline.ingest_path("docs/").await?;
//! let results = pipeline.query("search query").await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::chunking::{Chunker, build_chunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document, SearchResult};
use crate::error::{RagError, Result};
use crate::loader::DocumentLoader;
use crate::tokenizer::{RegexTokenizer, Tokenizer};
use crate::vectorstore::{MetadataFilter, VectorStore};

/// The retrieval pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    loader: DocumentLoader,
    chunker: Arc<dyn Chunker>,
    vector_store: Arc<VectorStore>,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("loader", &self.loader)
            .field("vector_store", &self.vector_store)
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.vector_store
    }

    /// Ingest a single document: chunk → embed → store.
    ///
    /// Returns the chunks that were stored.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineError`] if storage fails, including the
    /// document ID in the error message.
    pub async fn ingest(&self, document: &Document) -> Result<Vec<Chunk>> {
        let chunks = self.chunker.chunk(document);
        if chunks.is_empty() {
            info!(document.id = %document.id, chunk_count = 0, "ingested document (empty)");
            return Ok(chunks);
        }

        self.vector_store.add_chunks(&chunks).await.map_err(|e| {
            error!(document.id = %document.id, error = %e, "store failed during ingestion");
            RagError::PipelineError(format!("store failed for document '{}': {e}", document.id))
        })?;

        let chunk_count = chunks.len();
        info!(document.id = %document.id, chunk_count, "ingested document");
        Ok(chunks)
    }

    /// Ingest multiple documents.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineError`] on the first document that fails.
    pub async fn ingest_batch(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut all_chunks = Vec::new();
        for document in documents {
            all_chunks.extend(self.ingest(document).await?);
        }
        Ok(all_chunks)
    }

    /// Load a file, or every supported file under a directory, then ingest.
    ///
    /// Files that fail to load are logged and skipped.
    pub async fn ingest_path(&self, path: impl AsRef<Path>) -> Result<Vec<Chunk>> {
        let path = path.as_ref();
        let documents = if path.is_dir() {
            let report = self.loader.load_directory(path, true, None)?;
            for failure in &report.failures {
                warn!(path = %failure.path.display(), error = %failure.error, "skipped file");
            }
            report.documents
        } else {
            vec![self.loader.load(path)?]
        };
        self.ingest_batch(&documents).await
    }

    /// Query with the configured `top_k` and `similarity_threshold`.
    pub async fn query(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.query_with(query, self.config.top_k, self.config.similarity_threshold, None).await
    }

    /// Query with explicit search parameters.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineError`] if the search fails.
    pub async fn query_with(
        &self,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let results = self
            .vector_store
            .search(query, top_k, similarity_threshold, filter)
            .await
            .map_err(|e| {
                error!(error = %e, "vector store search failed");
                RagError::PipelineError(format!(
                    "search failed in collection '{}': {e}",
                    self.vector_store.collection()
                ))
            })?;
        info!(result_count = results.len(), "query completed");
        Ok(results)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `vector_store` is required. Without an explicit chunker one is built from
/// the config's chunking fields using the default tokenizer.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    chunker: Option<Arc<dyn Chunker>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    vector_store: Option<Arc<VectorStore>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document chunker, overriding the config's strategy.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the tokenizer used when the chunker is built from config.
    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Set the vector store.
    pub fn vector_store(mut self, store: Arc<VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the config is invalid or the vector
    /// store is missing.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(RagError::ConfigError(errors.join("; ")));
        }
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => build_chunker(
                config.chunking_strategy,
                config.chunk_size,
                config.chunk_overlap,
                config.overlap_sentences,
                self.tokenizer.unwrap_or_else(|| Arc::new(RegexTokenizer)),
            )?,
        };
        Ok(RagPipeline { config, loader: DocumentLoader::new(), chunker, vector_store })
    }
}
