//! Error types for the `ctxlab-eval` crate.

use std::path::PathBuf;

use ctxlab_rag::RagError;
use thiserror::Error;

/// Errors that can occur while configuring or running evaluations.
#[derive(Debug, Error)]
pub enum EvalError {
    /// One or more configuration problems, all reported together.
    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A report or config could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A retrieval component failed.
    #[error(transparent)]
    Rag(#[from] RagError),

    /// A system under test returned an error.
    #[error("Technique error: {0}")]
    Technique(String),
}

impl EvalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// A convenience result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;
