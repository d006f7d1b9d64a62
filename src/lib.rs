use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Missing required configuration: {}", .0.join(", "))]
    ConfigurationMissing(Vec<String>),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid document {}: {message}", .path.display())]
    Document { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether re-issuing the same call may succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Stable label used in logs.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::ConfigurationMissing(_) => "configuration_missing",
            Self::EmbeddingProvider(_) => "embedding_provider_error",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::CollectionNotFound(_) => "collection_not_found",
            Self::MalformedRecord(_) => "malformed_record",
            Self::VectorStore(_) => "vector_store_error",
            Self::Timeout(_) => "timeout",
            Self::Document { .. } => "invalid_document",
            Self::Io(_) => "io",
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod query;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
