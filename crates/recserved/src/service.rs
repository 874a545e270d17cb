//! Service assembly: config → registry, model manager, rollout and API state.

use std::sync::Arc;

use anyhow::Context;
use recserve_api::{ApiState, TraceStore};
use recserve_core::{RolloutSection, ServiceConfig};
use recserve_metrics::MetricsCollector;
use recserve_models::ModelVersionManager;
use recserve_registry::FsRegistry;
use recserve_rollout::{RolloutConfig, SharedRollout, Strategy};
use tracing::{info, warn};

/// Build the startup rollout config. An unrecognised strategy name falls
/// back to fixed routing instead of refusing to start.
pub fn rollout_config(section: &RolloutSection, primary_version: &str) -> RolloutConfig {
    let strategy = match section.strategy.parse::<Strategy>() {
        Ok(strategy) => strategy,
        Err(e) => {
            warn!(error = %e, "falling back to fixed rollout strategy");
            Strategy::Fixed
        }
    };

    let mut config = RolloutConfig::new(primary_version)
        .with_strategy(strategy)
        .with_environment(section.environment.clone());
    if let Some(canary) = section.canary_version.as_deref().filter(|v| !v.trim().is_empty()) {
        config = config.with_canary(canary.trim(), section.canary_percentage);
    }
    config
}

pub fn registry(config: &ServiceConfig, image_digest: Option<String>) -> FsRegistry {
    FsRegistry::new(&config.model.registry).with_image_digest(image_digest)
}

/// Assemble the API state and activate the startup model version.
///
/// Fails if the startup version cannot be loaded; the service must not
/// accept traffic without an active model.
pub async fn build_state(config: &ServiceConfig, image_digest: Option<String>) -> anyhow::Result<ApiState> {
    let metrics = Arc::new(MetricsCollector::new());
    let registry = Arc::new(registry(config, image_digest));
    info!(root = %registry.root().display(), "model registry opened");

    let models = Arc::new(ModelVersionManager::new(
        &config.model.name,
        registry,
        metrics.clone(),
        config.model.cache_capacity,
    ));
    models
        .initialize(&config.model.version)
        .await
        .with_context(|| format!("failed to activate startup model version {}", config.model.version))?;

    let rollout = rollout_config(&config.rollout, &config.model.version);
    info!(
        strategy = %rollout.strategy(),
        effective = %rollout.effective_strategy(),
        primary = %rollout.primary_version(),
        canary = rollout.canary_version().unwrap_or("none"),
        canary_percentage = rollout.canary_percentage(),
        environment = %rollout.environment(),
        "rollout configured"
    );

    Ok(ApiState {
        rollout: SharedRollout::new(rollout),
        models,
        metrics,
        traces: Arc::new(TraceStore::new(config.server.trace_capacity)),
    })
}
