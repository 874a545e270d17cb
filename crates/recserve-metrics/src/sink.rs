//! The metrics sink the model version manager reports to.

use std::fmt;

use serde::Serialize;

/// Outcome of one switch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchStatus {
    Success,
    NotFound,
    Error,
}

impl SwitchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels of the current-version gauge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionLabels {
    pub model_name: String,
    pub version: String,
    pub git_sha: String,
    pub data_snapshot: String,
}

/// Receiver of version-manager metrics.
///
/// Implementations must count every call: concurrent `record_switch` calls
/// may not be lost.
pub trait MetricsSink: Send + Sync {
    fn record_switch(&self, from_version: &str, to_version: &str, status: SwitchStatus);

    fn set_current_version(&self, labels: &VersionLabels);
}
