//! Error types shared across the jlcdb workspace

use thiserror::Error;

/// Result type alias for jlcdb-common operations
pub type Result<T> = std::result::Result<T, JlcdbError>;

/// Error type for the shared utilities.
///
/// The chunk joiner reports every reconstruction failure through the
/// `Reconstruction` variant so callers can treat "this artifact cannot be
/// rebuilt" as a single condition regardless of the underlying cause.
#[derive(Error, Debug)]
pub enum JlcdbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Artifact reconstruction failed: {0}. The chunk set is incomplete or corrupted; re-download the release assets.")]
    Reconstruction(String),

    #[error("Invalid chunk manifest: {0}")]
    InvalidManifest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JlcdbError {
    /// Shorthand for a reconstruction error with a formatted message
    pub fn reconstruction(msg: impl Into<String>) -> Self {
        JlcdbError::Reconstruction(msg.into())
    }
}
