//! Error types for somnia-core.

use thiserror::Error;

/// Result type alias using somnia-core's error type.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors surfaced by the memory engine.
///
/// Gate refusals and rolled-back training batches are not errors; they are
/// reported through [`crate::scheduler::GateDecision`] and
/// [`crate::consolidation::BatchOutcome`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Unknown tier tag
    #[error("Invalid memory tier: {0}")]
    InvalidTier(String),

    /// Embedding dimensions disagree
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding collaborator unreachable or failed
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Generation collaborator unreachable or failed
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Persisting an archive entry failed
    #[error("Archive write failed: {0}")]
    ArchiveWrite(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Initialization or configuration error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl MemoryError {
    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::InvalidTier(_) => "invalid_tier",
            MemoryError::DimensionMismatch { .. } => "dimension_mismatch",
            MemoryError::EmbeddingUnavailable(_) => "embedding_unavailable",
            MemoryError::GenerationUnavailable(_) => "generation_unavailable",
            MemoryError::ArchiveWrite(_) => "archive_write_failure",
            MemoryError::Database(_) => "database",
            MemoryError::Serialization(_) => "serialization",
            MemoryError::Io(_) => "io",
            MemoryError::Init(_) => "init",
        }
    }
}
