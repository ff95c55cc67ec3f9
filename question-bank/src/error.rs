//! Error types for question-bank

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the question bank
#[derive(Debug, Error)]
pub enum QuestionBankError {
    /// SQLite error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A write transaction was aborted; the store is unchanged
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// A stored embedding could not be decoded to a vector of the expected length
    #[error("Corrupt embedding for question {question_id}: {reason}")]
    CorruptEmbedding { question_id: i64, reason: String },

    /// Vector length disagrees with the index or model dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Fallback answer provider failure
    #[error("Fallback error: {0}")]
    Fallback(String),

    /// An external call exceeded its time bound
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// Database was written with a different embedding model
    #[error("Embedding model mismatch: database uses {stored}, provider is {current}")]
    ModelMismatch { stored: String, current: String },

    /// Unsupported schema version
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid matcher configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Model loading error
    #[error("Model error: {0}")]
    Model(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl QuestionBankError {
    /// Create an ingestion error
    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    /// Create a corrupt embedding error
    pub fn corrupt_embedding(question_id: i64, reason: impl Into<String>) -> Self {
        Self::CorruptEmbedding {
            question_id,
            reason: reason.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a fallback error
    pub fn fallback(msg: impl Into<String>) -> Self {
        Self::Fallback(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type for question bank operations
pub type Result<T> = std::result::Result<T, QuestionBankError>;
