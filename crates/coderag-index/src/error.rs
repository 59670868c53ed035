//! Error types for coderag-index.

use std::fmt;
use std::num::TryFromIntError;

/// External service a pipeline stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Embedder,
    Generator,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Embedder => "embedder",
            Self::Generator => "generator",
        })
    }
}

/// Errors that can occur during indexing, retrieval and answering.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector index error outside the degraded retrieval path.
    #[error("vector store error: {0}")]
    VectorStore(#[from] coderag_store::VectorStoreError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required external dependency failed or timed out.
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable {
        dependency: Dependency,
        reason: String,
    },

    /// Indexing a repository produced no chunks.
    #[error("repository {repo} has no indexable source")]
    EmptyRepository { repo: String },

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    pub(crate) fn unavailable(dependency: Dependency, reason: impl fmt::Display) -> Self {
        Self::DependencyUnavailable {
            dependency,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
