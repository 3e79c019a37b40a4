//! Error types for updock.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use thiserror::Error;

/// Result type alias for updock operations.
pub type Result<T> = std::result::Result<T, UpdockError>;

/// Main error type for updock.
#[derive(Error, Debug)]
pub enum UpdockError {
    // Registry errors
    #[error("No registry provider matches image {image}")]
    UnsupportedRegistry { image: String },

    #[error("Registry fetch failed for {image}: {reason}")]
    RegistryFetch { image: String, reason: String },

    #[error("Manifest digest unavailable for {image}: {reason}")]
    DigestUnavailable { image: String, reason: String },

    // Update pipeline errors
    #[error("Security gate rejected {image}: {reason}")]
    SecurityGate { image: String, reason: String },

    #[error("{stage} hook failed: {reason}")]
    HookFailed { stage: String, reason: String },

    #[error("Failed to pull {image}: {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Failed to replace container {container}: {reason}")]
    ReplaceFailed { container: String, reason: String },

    #[error("Timed out waiting for {operation} after {secs}s")]
    WaitTimeout { operation: String, secs: u64 },

    // Engine errors
    #[error("Container not found: {container}")]
    ContainerNotFound { container: String },

    #[error("Engine operation {operation} failed: {reason}")]
    Engine { operation: String, reason: String },

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Audit error: {0}")]
    Audit(String),

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UpdockError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
