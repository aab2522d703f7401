//! Error types for the `ctxlab-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An embedding model could not be loaded.
    #[error("Failed to load embedding model '{model}': {message}")]
    ModelLoadError {
        /// The requested model name.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during document chunking.
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    /// Caller supplied inconsistent or dangerous input.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The file extension is not one the loader understands.
    #[error("Unsupported file type '{extension}' (supported: {})", supported.join(", "))]
    UnsupportedFileType {
        /// The rejected extension, without the leading dot.
        extension: String,
        /// Extensions the loader accepts.
        supported: Vec<String>,
    },

    /// The chunking strategy name is not recognised.
    #[error("Unknown chunking strategy '{name}' (valid: {})", valid.join(", "))]
    UnknownStrategy {
        /// The rejected strategy name.
        name: String,
        /// Strategy names that are accepted.
        valid: Vec<String>,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An error in the ingest/query pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
