//! Error types for rollout configuration.

use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors raised by rollout configuration updates.
///
/// Routing itself never fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RolloutError {
    #[error("invalid strategy: {0:?} (expected one of fixed, canary, ab_test, shadow)")]
    InvalidStrategy(String),
}
