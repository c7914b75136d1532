//! Error types for mbrec-core.

use thiserror::Error;

/// Errors raised while loading, slicing or sampling interaction data.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed line in an interaction file.
    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    /// Row or column index outside the matrix / id space.
    #[error("index {index} out of bounds for {context} of size {bound}")]
    IndexOutOfBounds {
        index: usize,
        bound: usize,
        context: &'static str,
    },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A sampling request that cannot be satisfied.
    #[error("sampling error: {0}")]
    Sampling(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
