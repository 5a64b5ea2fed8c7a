//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by checkpoint persistence backends.
///
/// Any of these is fatal to the run that triggered it: the engine never
/// advances to the next super-step without a durable checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested thread or checkpoint id
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// Snapshot (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary snapshot (de)serialization failed
    #[error("binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Backend storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed request or checkpoint record
    #[error("invalid checkpoint: {0}")]
    Invalid(String),

    /// I/O error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom backend error
    #[error("{0}")]
    Custom(String),
}
