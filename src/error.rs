//! Error types for the vector-index engine.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Structured error type distinguishing fatal update failures from
/// recoverable per-file skips.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to connect to vector store at {uri}: {cause}")]
    VectorStoreConnectionFailed { uri: String, cause: String },

    #[error("vector table operation failed on {table}: {cause}")]
    VectorTableFailed { table: String, cause: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: i32, actual: i32 },

    #[error("sqlite operation failed ({operation}): {cause}")]
    CacheIoFailed { operation: String, cause: String },

    #[error("embedding provider failed: {cause}")]
    EmbeddingFailed { cause: String },

    #[error("embedding provider violated its contract: {detail}")]
    ProviderContractViolation { detail: String },

    #[error("file not indexable: {path} ({reason})")]
    FileNotIndexable { path: String, reason: String },

    #[error("remote cache request failed: {cause}")]
    RemoteCacheFailed { cause: String },

    #[error("invalid configuration for {field}: {cause}")]
    ConfigError { field: String, cause: String },
}
