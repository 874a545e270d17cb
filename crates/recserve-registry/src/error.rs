//! Error types for the model registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model {model} version {version} not found")]
    NotFound { model: String, version: String },

    #[error("failed to load artifact at {location}: {reason}")]
    Load { location: String, reason: String },

    #[error("invalid metadata for version {version}: {reason}")]
    Metadata { version: String, reason: String },

    #[error("unknown user_id {0}")]
    UnknownUser(u64),
}
