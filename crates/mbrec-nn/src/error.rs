//! Error types for mbrec-nn.

use thiserror::Error;

/// Model, training and checkpoint errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Data-side error (sampling, slicing, config).
    #[error(transparent)]
    Core(#[from] mbrec_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Missing or corrupt checkpoint.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// An optimizer step that did not complete.
    #[error("training step {step} failed: {source}")]
    StepFailed {
        step: usize,
        #[source]
        source: Box<Error>,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
