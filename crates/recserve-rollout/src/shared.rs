//! Shared handle around the live rollout configuration.
//!
//! Every request reads the config; operators update it rarely. Updates are
//! applied under a single write lock so a reader sees either the whole old
//! config or the whole new one. In-flight requests are not pinned: a change
//! takes effect on the next routing call.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::RolloutResult;
use crate::router::{RoutingDecision, route};
use crate::strategy::{RolloutConfig, RolloutUpdate};

#[derive(Debug, Clone)]
pub struct SharedRollout {
    inner: Arc<RwLock<RolloutConfig>>,
}

impl SharedRollout {
    pub fn new(config: RolloutConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current config.
    pub async fn snapshot(&self) -> RolloutConfig {
        self.inner.read().await.clone()
    }

    /// Route `user_id` under the current config.
    pub async fn route(&self, user_id: u64) -> RoutingDecision {
        route(&*self.inner.read().await, user_id)
    }

    /// Merge a partial update and return the resulting config.
    pub async fn update(&self, update: &RolloutUpdate) -> RolloutResult<RolloutConfig> {
        let mut config = self.inner.write().await;
        config.apply(update)?;
        info!(
            strategy = %config.strategy(),
            effective = %config.effective_strategy(),
            canary_version = config.canary_version().unwrap_or("none"),
            canary_percentage = config.canary_percentage(),
            "rollout config updated"
        );
        Ok(config.clone())
    }

    /// Point primary traffic at `version` after a successful hot swap.
    pub async fn set_primary_version(&self, version: &str) {
        let mut config = self.inner.write().await;
        if config.primary_version() != version {
            info!(
                from = %config.primary_version(),
                to = %version,
                "rollout primary version changed"
            );
            config.set_primary_version(version);
        }
    }
}
