//! Error types for the model version manager.

use recserve_metrics::SwitchStatus;
use recserve_registry::RegistryError;
use thiserror::Error;

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("model version not found: {0}")]
    VersionNotFound(String),

    #[error("failed to load model version {version}: {reason}")]
    LoadError { version: String, reason: String },

    #[error("no model version has been activated yet")]
    NotInitialized,
}

impl ManagerError {
    pub(crate) fn from_registry(version: &str, err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { .. } => Self::VersionNotFound(version.to_string()),
            other => Self::LoadError {
                version: version.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Status label recorded for a failed switch.
    pub fn switch_status(&self) -> SwitchStatus {
        match self {
            Self::VersionNotFound(_) => SwitchStatus::NotFound,
            Self::LoadError { .. } | Self::NotInitialized => SwitchStatus::Error,
        }
    }
}
