//! Error types for the build pipeline
//!
//! The taxonomy separates errors by how the pipeline recovers from them:
//! transient network failures are retried with backoff, malformed upstream
//! records are skipped per record, store integrity violations abort the
//! run, artifact reconstruction failures are fatal per artifact, and a
//! profile build failure is isolated to that profile.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type for the build pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network failure that exhausted its retry budget
    #[error("Network request failed after {attempts} attempts: {message}. The upstream API may be rate limiting; re-run later.")]
    TransientNetwork { attempts: u32, message: String },

    /// A single upstream record failed to normalize (skipped, not fatal)
    #[error("Upstream record failed to normalize: {0}")]
    UpstreamSchema(String),

    /// The store's uniqueness invariant was violated (fatal)
    #[error("Component store integrity violation: {0}. The cache database is corrupt; rebuild it from the last good release.")]
    StoreIntegrity(String),

    /// One profile's parts-view build failed (isolated per profile)
    #[error("Parts-view build for profile '{profile}' failed: {message}")]
    ProfileBuild { profile: String, message: String },

    /// Chunk split/join or checksum failure from the shared layer
    #[error(transparent)]
    Artifact(#[from] jlcdb_common::JlcdbError),

    /// Unexpected upstream API response
    #[error("Upstream API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Shorthand for a profile build failure
    pub fn profile_build(profile: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::ProfileBuild {
            profile: profile.into(),
            message: message.into(),
        }
    }

    /// True when the error class is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PipelineError::TransientNetwork { .. } => true,
            // 5xx and rate-limit responses clear up on their own; 4xx won't.
            PipelineError::Api { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}
