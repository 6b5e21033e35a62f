//! Error taxonomy for the retrieval pipeline.
//!
//! Each stage has its own error type so callers can decide containment:
//! extraction errors stay per-document, embedding and build errors abort a
//! rebuild without touching the live index, and retrieval errors degrade to
//! an empty result set at the query surface.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A document could not be turned into pages.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// A single strategy rejected the input.
    #[error("{strategy}: {message}")]
    Strategy {
        strategy: &'static str,
        message: String,
    },

    /// Every strategy in the chain failed.
    #[error("all extraction strategies failed for {document}: {}", attempts.join("; "))]
    Exhausted {
        document: String,
        attempts: Vec<String>,
    },

    #[error("failed to read {document}: {message}")]
    Read { document: String, message: String },
}

/// Invalid configuration, rejected before any processing starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// The embedding provider could not produce vectors.
#[derive(Error, Debug)]
pub enum EmbeddingProviderError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// The generation provider could not produce an answer.
#[derive(Error, Debug)]
pub enum GenerationProviderError {
    #[error("generation request timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

/// A new index could not be built from the supplied vectors.
#[derive(Error, Debug, PartialEq)]
pub enum IndexBuildError {
    #[error("empty corpus: no vectors to index")]
    EmptyCorpus,

    #[error("{vectors} vectors but {metadata} metadata entries")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("row {row} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("vectors must have a non-zero dimension")]
    ZeroDimension,
}

/// A persisted index could not be loaded. Treated as "no index yet".
#[derive(Error, Debug)]
pub enum IndexUnavailableError {
    #[error("no index at {0}")]
    Missing(PathBuf),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("index dimension {found} does not match expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("index was built with model '{found}', active embedder is '{expected}'")]
    ModelMismatch { expected: String, found: String },

    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A query could not be answered.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingProviderError),

    #[error("query vector has dimension {found}, index expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}
