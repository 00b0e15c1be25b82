//! Error types for the retrieval engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while building, loading or querying a generation.
#[derive(Error, Debug)]
pub enum RagError {
    /// A required on-disk artifact is absent.
    #[error("Index missing: {path} (run `rag ingest` first)")]
    IndexMissing { path: PathBuf },

    /// Artifacts of one generation disagree on length or id layout.
    #[error("Corpus inconsistent: {message}")]
    CorpusInconsistent { message: String },

    /// Vector dimension does not match the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding capability exceeded its time bound.
    #[error("Embedding timed out after {timeout_ms}ms")]
    EmbedTimeout { timeout_ms: u64 },

    /// Pairwise scorer exceeded its time bound.
    #[error("Reranking timed out after {timeout_ms}ms")]
    RerankTimeout { timeout_ms: u64 },

    /// Configuration rejected at construction.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Pairwise scorer is not available in this deployment.
    #[error("Pairwise scorer unavailable: {reason}")]
    ScorerUnavailable { reason: String },

    /// Pairwise scorer hit a resource problem (device, memory).
    #[error("Pairwise scorer resource error: {message}")]
    ScorerResource { message: String },

    /// Pairwise scorer failed for any other reason.
    #[error("Pairwise scorer error: {message}")]
    Scorer { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Chunking error.
    #[error("Chunking error: {message}")]
    Chunking { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a corpus inconsistency error.
    pub fn corpus_inconsistent(message: impl Into<String>) -> Self {
        Self::CorpusInconsistent {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a chunking error.
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking {
            message: message.into(),
        }
    }

    /// Create a scorer error.
    pub fn scorer(message: impl Into<String>) -> Self {
        Self::Scorer {
            message: message.into(),
        }
    }

    /// Create a scorer resource error.
    pub fn scorer_resource(message: impl Into<String>) -> Self {
        Self::ScorerResource {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error can only come out of a load or reload attempt.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::IndexMissing { .. } | Self::CorpusInconsistent { .. } | Self::Database { .. }
        )
    }

    /// Get the stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::IndexMissing { .. } => "INDEX_MISSING",
            Self::CorpusInconsistent { .. } => "CORPUS_INCONSISTENT",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::EmbedTimeout { .. } => "EMBED_TIMEOUT",
            Self::RerankTimeout { .. } => "RERANK_TIMEOUT",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::ScorerUnavailable { .. } => "SCORER_UNAVAILABLE",
            Self::ScorerResource { .. } => "SCORER_RESOURCE_ERROR",
            Self::Scorer { .. } => "SCORER_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Chunking { .. } => "CHUNKING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
