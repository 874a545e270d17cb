//! recserve.toml configuration parser.
//!
//! The effective configuration is layered: built-in defaults, then the
//! optional TOML file, then environment variables. CLI flags are applied
//! last by the daemon.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub model: ModelSection,
    pub rollout: RolloutSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Model family served by this process (e.g. `als`).
    pub name: String,
    /// Version activated at startup. Also the initial primary version.
    pub version: String,
    /// Root directory of the model registry.
    pub registry: String,
    /// Maximum number of loaded model versions kept resident.
    pub cache_capacity: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: "als".to_string(),
            version: "v0.3".to_string(),
            registry: "model_registry".to_string(),
            cache_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutSection {
    /// Strategy name, validated by the rollout layer at startup.
    pub strategy: String,
    pub canary_version: Option<String>,
    pub canary_percentage: f64,
    pub environment: String,
}

impl Default for RolloutSection {
    fn default() -> Self {
        Self {
            strategy: "fixed".to_string(),
            canary_version: None,
            canary_percentage: 0.0,
            environment: "production".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    /// Number of request traces retained for `/trace/{request_id}`.
    pub trace_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            trace_capacity: 1000,
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys: `MODEL_NAME`, `MODEL_VERSION`, `MODEL_REGISTRY`,
    /// `ROLLOUT_STRATEGY`, `CANARY_VERSION`, `CANARY_PERCENTAGE`,
    /// `ENVIRONMENT`, `PORT`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MODEL_NAME") {
            self.model.name = v;
        }
        if let Some(v) = get("MODEL_VERSION") {
            self.model.version = v;
        }
        if let Some(v) = get("MODEL_REGISTRY") {
            self.model.registry = v;
        }
        if let Some(v) = get("ROLLOUT_STRATEGY") {
            self.rollout.strategy = v;
        }
        if let Some(v) = get("CANARY_VERSION") {
            self.rollout.canary_version = Some(v);
        }
        if let Some(v) = get("CANARY_PERCENTAGE") {
            self.rollout.canary_percentage =
                v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "CANARY_PERCENTAGE",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("ENVIRONMENT") {
            self.rollout.environment = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: v.clone(),
            })?;
        }
        Ok(())
    }
}
