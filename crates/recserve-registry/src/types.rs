//! Domain types shared between the registry and the version manager.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;

/// One loadable artifact set: `(model_name, version)`.
///
/// Model names are case-insensitive and stored lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub model_name: String,
    pub version: String,
}

impl ModelKey {
    pub fn new(model_name: &str, version: &str) -> Self {
        Self {
            model_name: model_name.trim().to_lowercase(),
            version: version.trim().to_string(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_name, self.version)
    }
}

/// Where a resolved artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactLocation {
    /// A directory on the local filesystem.
    Dir(PathBuf),
    /// An opaque location understood only by the registry that issued it.
    Opaque(String),
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dir(path) => write!(f, "{}", path.display()),
            Self::Opaque(loc) => f.write_str(loc),
        }
    }
}

/// Metadata for one registry version. Surfaced in responses and logs,
/// never interpreted by the serving core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub git_sha: String,
    pub data_snapshot_id: String,
    pub metrics: BTreeMap<String, f64>,
    pub artifact_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    /// Per-model `meta.json`, passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_meta: Option<serde_json::Value>,
    /// Version metadata keys with no dedicated field.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RegistryEntry {
    /// Entry with every provenance field set to `unknown`.
    pub fn unknown(key: &ModelKey, artifact_location: &str) -> Self {
        Self {
            model_name: key.model_name.clone(),
            version: key.version.clone(),
            created_at: UNKNOWN.to_string(),
            git_sha: UNKNOWN.to_string(),
            data_snapshot_id: UNKNOWN.to_string(),
            metrics: BTreeMap::new(),
            artifact_location: artifact_location.to_string(),
            image_digest: None,
            model_meta: None,
            extra: BTreeMap::new(),
        }
    }
}

pub(crate) const UNKNOWN: &str = "unknown";

/// A ready-to-serve model instance.
pub trait Recommender: Send + Sync + fmt::Debug {
    /// Top-`k` item ids for `user_id`, best first.
    fn recommend(&self, user_id: u64, k: usize) -> RegistryResult<Vec<u64>>;
}

/// The model registry collaborator.
///
/// Calls may block on disk or network I/O; async callers should run them
/// on a blocking thread.
pub trait ModelRegistry: Send + Sync + 'static {
    /// Find the artifact for `key`, or [`RegistryError::NotFound`].
    ///
    /// [`RegistryError::NotFound`]: crate::RegistryError::NotFound
    fn resolve(&self, key: &ModelKey) -> RegistryResult<ArtifactLocation>;

    /// Load a resolved artifact into memory.
    fn load(&self, location: &ArtifactLocation) -> RegistryResult<Arc<dyn Recommender>>;

    /// Provenance metadata for `key`.
    fn metadata(&self, key: &ModelKey) -> RegistryResult<RegistryEntry>;
}
