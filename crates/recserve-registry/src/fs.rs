//! Filesystem-backed model registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::factor::FactorModel;
use crate::types::{ArtifactLocation, ModelKey, ModelRegistry, Recommender, RegistryEntry, UNKNOWN};

/// Artifact file inside `<root>/<version>/<model>/`.
pub const ARTIFACT_FILE: &str = "model.json";

/// Version metadata files, checked in order.
const VERSION_META_FILES: [&str; 3] = ["meta.json", "meta.yaml", "meta.yml"];

#[derive(Debug, Clone)]
pub struct FsRegistry {
    root: PathBuf,
    image_digest: Option<String>,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            image_digest: None,
        }
    }

    /// Container image digest reported for every version, overriding any
    /// `image_digest` found in version metadata.
    pub fn with_image_digest(mut self, digest: Option<String>) -> Self {
        self.image_digest = digest.filter(|d| !d.is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Versions present under the root, sorted.
    pub fn list_versions(&self) -> RegistryResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        let mut versions: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn model_dir(&self, key: &ModelKey) -> RegistryResult<PathBuf> {
        let not_found = || RegistryError::NotFound {
            model: key.model_name.clone(),
            version: key.version.clone(),
        };
        if !is_plain_segment(&key.version) || !is_plain_segment(&key.model_name) {
            return Err(not_found());
        }
        let dir = self.root.join(&key.version).join(&key.model_name);
        if dir.is_dir() { Ok(dir) } else { Err(not_found()) }
    }

    fn read_version_meta(&self, version: &str) -> RegistryResult<Map<String, Value>> {
        let version_dir = self.root.join(version);
        for name in VERSION_META_FILES {
            let path = version_dir.join(name);
            if !path.is_file() {
                continue;
            }
            let meta_err = |reason: String| RegistryError::Metadata {
                version: version.to_string(),
                reason: format!("{}: {reason}", path.display()),
            };
            let text = std::fs::read_to_string(&path).map_err(|e| meta_err(e.to_string()))?;
            let value: Value = if name.ends_with(".json") {
                serde_json::from_str(&text).map_err(|e| meta_err(e.to_string()))?
            } else {
                let yaml: serde_yaml::Value =
                    serde_yaml::from_str(&text).map_err(|e| meta_err(e.to_string()))?;
                serde_json::to_value(yaml).map_err(|e| meta_err(e.to_string()))?
            };
            return match value {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                _ => Err(meta_err("expected a mapping".to_string())),
            };
        }
        Ok(Map::new())
    }
}

impl ModelRegistry for FsRegistry {
    fn resolve(&self, key: &ModelKey) -> RegistryResult<ArtifactLocation> {
        let dir = self.model_dir(key)?;
        debug!(%key, path = %dir.display(), "resolved model artifact");
        Ok(ArtifactLocation::Dir(dir))
    }

    fn load(&self, location: &ArtifactLocation) -> RegistryResult<Arc<dyn Recommender>> {
        match location {
            ArtifactLocation::Dir(dir) => {
                let model = FactorModel::from_file(&dir.join(ARTIFACT_FILE))?;
                debug!(
                    path = %dir.display(),
                    rank = model.rank(),
                    items = model.item_count(),
                    "loaded factor model"
                );
                Ok(Arc::new(model))
            }
            ArtifactLocation::Opaque(loc) => Err(RegistryError::Load {
                location: loc.clone(),
                reason: "filesystem registry cannot load opaque locations".to_string(),
            }),
        }
    }

    fn metadata(&self, key: &ModelKey) -> RegistryResult<RegistryEntry> {
        let dir = self.model_dir(key)?;
        let mut entry = RegistryEntry::unknown(key, &dir.display().to_string());

        let mut meta = self.read_version_meta(&key.version)?;
        meta.remove("version");
        if let Some(v) = take_string(&mut meta, "git_sha") {
            entry.git_sha = v;
        }
        if let Some(v) = take_string(&mut meta, "data_snapshot_id")
            .or_else(|| take_string(&mut meta, "data_snapshot"))
        {
            entry.data_snapshot_id = v;
        }
        if let Some(v) = take_string(&mut meta, "created_at") {
            entry.created_at = v;
        }
        entry.image_digest = take_string(&mut meta, "image_digest");
        if let Some(Value::Object(metrics)) = meta.remove("metrics") {
            entry.metrics = numeric_metrics(metrics);
        }
        entry.extra = meta.into_iter().collect();

        if self.image_digest.is_some() {
            entry.image_digest = self.image_digest.clone();
        }

        let model_meta = dir.join("meta.json");
        if model_meta.is_file() {
            let text = std::fs::read_to_string(&model_meta).map_err(|e| RegistryError::Metadata {
                version: key.version.clone(),
                reason: e.to_string(),
            })?;
            entry.model_meta =
                Some(serde_json::from_str(&text).map_err(|e| RegistryError::Metadata {
                    version: key.version.clone(),
                    reason: format!("{}: {e}", model_meta.display()),
                })?);
        }

        Ok(entry)
    }
}

/// Reject empty names and anything that could escape the registry root.
fn is_plain_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

fn take_string(meta: &mut Map<String, Value>, key: &str) -> Option<String> {
    match meta.remove(key)? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn numeric_metrics(metrics: Map<String, Value>) -> BTreeMap<String, f64> {
    metrics
        .into_iter()
        .filter_map(|(k, v)| v.as_f64().map(|f| (k, f)))
        .collect()
}
