// error.rs
// Error types shared by every pipeline phase

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Fatal errors. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Unknown method/metric or an out-of-range option.
    #[error("configuration error: {0}")]
    Config(String),

    /// The input documents cannot be analyzed.
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// The clustering backend rejected the input.
    #[error("clustering failed: {0}")]
    Clustering(String),

    /// Reading input or writing an artifact failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Problems with the document set itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("at least 2 documents with embeddings are required, found {found}")]
    InsufficientData { found: usize },

    #[error("document {id} has embedding dimension {actual}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("document {id} has an empty embedding")]
    EmptyEmbedding { id: String },

    #[error("duplicate document id {id}")]
    DuplicateId { id: String },
}

/// Failures of the external text-generation capability.
///
/// These are recovered per cluster and never abort a run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("text generation service unavailable: {0}")]
    Unavailable(String),

    #[error("text generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed text generation response: {0}")]
    MalformedResponse(String),
}
