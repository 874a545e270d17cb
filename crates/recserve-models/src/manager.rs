//! Model version manager: active model plus hot-swap.
//!
//! # Concurrency model
//!
//! - `state` (active model + cache) sits behind an async `RwLock`. Readers
//!   only need the shared lock; the active model is stored as an `Arc` next
//!   to the cache so a reader always sees a consistent pair.
//! - `switch_lock` serialises switches. Registry I/O runs on a blocking
//!   thread while only `switch_lock` is held, so `get_active()` keeps
//!   serving the current version during a slow load.
//! - The marker update and the cache insert happen under one write lock.
//! - Each version has at most one load in flight. Concurrent requests for
//!   the same uncached version wait on a per-key gate and then reuse the
//!   cached instance.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use recserve_metrics::{MetricsSink, SwitchStatus, VersionLabels};
use recserve_registry::{ModelKey, ModelRegistry, Recommender, RegistryEntry, RegistryResult};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::ModelCache;
use crate::error::{ManagerError, ManagerResult};

/// A ready-to-serve model bound to one registry version.
pub struct LoadedModel {
    pub key: ModelKey,
    pub entry: RegistryEntry,
    recommender: Arc<dyn Recommender>,
}

impl LoadedModel {
    pub fn new(key: ModelKey, entry: RegistryEntry, recommender: Arc<dyn Recommender>) -> Self {
        Self {
            key,
            entry,
            recommender,
        }
    }

    pub fn version(&self) -> &str {
        &self.key.version
    }

    pub fn recommend(&self, user_id: u64, k: usize) -> RegistryResult<Vec<u64>> {
        self.recommender.recommend(user_id, k)
    }

    fn labels(&self) -> VersionLabels {
        VersionLabels {
            model_name: self.key.model_name.clone(),
            version: self.key.version.clone(),
            git_sha: self.entry.git_sha.clone(),
            data_snapshot: self.entry.data_snapshot_id.clone(),
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("key", &self.key)
            .field("git_sha", &self.entry.git_sha)
            .finish_non_exhaustive()
    }
}

/// Before/after state of a successful switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchResult {
    pub model_name: String,
    /// `None` for the first activation.
    pub previous_version: Option<String>,
    pub new_version: String,
    pub registry_metadata: RegistryEntry,
}

struct VersionState {
    active: Option<Arc<LoadedModel>>,
    cache: ModelCache,
}

pub struct ModelVersionManager {
    model_name: String,
    registry: Arc<dyn ModelRegistry>,
    metrics: Arc<dyn MetricsSink>,
    state: RwLock<VersionState>,
    switch_lock: Mutex<()>,
    load_gates: std::sync::Mutex<HashMap<ModelKey, Arc<Mutex<()>>>>,
}

impl ModelVersionManager {
    pub fn new(
        model_name: &str,
        registry: Arc<dyn ModelRegistry>,
        metrics: Arc<dyn MetricsSink>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            model_name: model_name.trim().to_lowercase(),
            registry,
            metrics,
            state: RwLock::new(VersionState {
                active: None,
                cache: ModelCache::new(cache_capacity),
            }),
            switch_lock: Mutex::new(()),
            load_gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Activate the startup version. The service must not accept traffic
    /// until this succeeds.
    pub async fn initialize(&self, version: &str) -> ManagerResult<SwitchResult> {
        let result = self.switch(version).await?;
        info!(model = %self.model_name, version = %result.new_version, "model manager initialized");
        Ok(result)
    }

    /// The active model.
    pub async fn get_active(&self) -> ManagerResult<Arc<LoadedModel>> {
        self.state
            .read()
            .await
            .active
            .clone()
            .ok_or(ManagerError::NotInitialized)
    }

    pub async fn active_version(&self) -> Option<String> {
        self.state
            .read()
            .await
            .active
            .as_ref()
            .map(|m| m.key.version.clone())
    }

    /// Cached versions, sorted.
    pub async fn cached_versions(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .cache
            .keys()
            .into_iter()
            .map(|k| k.version)
            .collect()
    }

    /// Fetch `version` for serving without changing the active marker,
    /// loading and caching it if needed.
    pub async fn get_or_load(&self, version: &str) -> ManagerResult<Arc<LoadedModel>> {
        let key = ModelKey::new(&self.model_name, version);
        {
            let state = self.state.read().await;
            if let Some(active) = state.active.as_ref().filter(|m| m.key == key) {
                return Ok(Arc::clone(active));
            }
            if let Some(model) = state.cache.get(&key) {
                return Ok(model);
            }
        }

        self.load_once(&key, false).await
    }

    /// Make `target` the active version.
    ///
    /// On failure the active version is unchanged and nothing is cached.
    /// Every call records exactly one switch outcome.
    pub async fn switch(&self, target: &str) -> ManagerResult<SwitchResult> {
        self.switch_with(target, |_| async {}).await
    }

    /// Like [`switch`](Self::switch), but runs `on_commit` with the new
    /// version before the switch lock is released, so state that must
    /// follow the active version is updated in switch order.
    pub async fn switch_with<F, Fut>(&self, target: &str, on_commit: F) -> ManagerResult<SwitchResult>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let _guard = self.switch_lock.lock().await;

        let key = ModelKey::new(&self.model_name, target);
        let previous = self.active_version().await;
        let from = previous.as_deref().unwrap_or("none");

        let model = match self.load_once(&key, true).await {
            Ok(model) => model,
            Err(e) => {
                self.metrics
                    .record_switch(from, &key.version, e.switch_status());
                warn!(model = %self.model_name, from = %from, to = %key.version, error = %e, "model switch failed");
                return Err(e);
            }
        };

        let model = {
            let mut state = self.state.write().await;
            let model = state.cache.insert(model, Some(&key));
            state.active = Some(Arc::clone(&model));
            model
        };

        self.metrics
            .record_switch(from, &key.version, SwitchStatus::Success);
        self.metrics.set_current_version(&model.labels());
        info!(
            model = %self.model_name,
            from = %from,
            to = %key.version,
            git_sha = %model.entry.git_sha,
            data_snapshot = %model.entry.data_snapshot_id,
            "model switched"
        );

        on_commit(key.version.clone()).await;

        Ok(SwitchResult {
            model_name: self.model_name.clone(),
            previous_version: previous,
            new_version: key.version.clone(),
            registry_metadata: model.entry.clone(),
        })
    }

    /// Fetch `key` and cache it, with at most one load per key in flight.
    ///
    /// `pin_new` protects the new entry from eviction; otherwise the
    /// active model is pinned.
    async fn load_once(&self, key: &ModelKey, pin_new: bool) -> ManagerResult<Arc<LoadedModel>> {
        let gate = {
            let mut gates = self.load_gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(key.clone()).or_default())
        };

        let result = {
            let _loading = gate.lock().await;
            match self.fetch(key).await {
                Ok(model) => {
                    let mut state = self.state.write().await;
                    let pinned = if pin_new {
                        Some(key.clone())
                    } else {
                        state.active.as_ref().map(|m| m.key.clone())
                    };
                    Ok(state.cache.insert(model, pinned.as_ref()))
                }
                Err(e) => Err(e),
            }
        };

        // The map and this handle are the only holders once nobody waits.
        let mut gates = self.load_gates.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&gate) <= 2 {
            gates.remove(key);
        }
        result
    }

    /// Resolve `key`, reusing a cached instance when present, else load it.
    async fn fetch(&self, key: &ModelKey) -> ManagerResult<Arc<LoadedModel>> {
        let version = key.version.clone();

        let resolve_key = key.clone();
        let location = self
            .blocking(&version, move |r| r.resolve(&resolve_key))
            .await?;

        if let Some(model) = self.state.read().await.cache.get(key) {
            debug!(%key, "model cache hit");
            return Ok(model);
        }

        debug!(%key, %location, "loading model");
        let load_key = key.clone();
        let loaded = self
            .blocking(&version, move |r| {
                let recommender = r.load(&location)?;
                let entry = r.metadata(&load_key)?;
                Ok(LoadedModel::new(load_key, entry, recommender))
            })
            .await?;
        Ok(Arc::new(loaded))
    }

    /// Run a registry call on a blocking thread.
    async fn blocking<T, F>(&self, version: &str, f: F) -> ManagerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ModelRegistry) -> RegistryResult<T> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || f(registry.as_ref()))
            .await
            .map_err(|e| ManagerError::LoadError {
                version: version.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| ManagerError::from_registry(version, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recserve_metrics::MetricsCollector;
    use recserve_registry::{ArtifactLocation, RegistryError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct VersionEcho(u64);

    impl Recommender for VersionEcho {
        fn recommend(&self, _user_id: u64, _k: usize) -> RegistryResult<Vec<u64>> {
            Ok(vec![self.0])
        }
    }

    /// Registry over `v<N>` names; `model.recommend()` returns `[N]`.
    struct FakeRegistry {
        versions: HashSet<String>,
        broken: HashSet<String>,
        loads: AtomicUsize,
        load_delay: Duration,
    }

    impl FakeRegistry {
        fn new(versions: &[&str]) -> Self {
            Self {
                versions: versions.iter().map(|v| v.to_string()).collect(),
                broken: HashSet::new(),
                loads: AtomicUsize::new(0),
                load_delay: Duration::ZERO,
            }
        }

        fn with_broken(mut self, version: &str) -> Self {
            self.versions.insert(version.to_string());
            self.broken.insert(version.to_string());
            self
        }

        fn with_load_delay(mut self, delay: Duration) -> Self {
            self.load_delay = delay;
            self
        }
    }

    impl ModelRegistry for FakeRegistry {
        fn resolve(&self, key: &ModelKey) -> RegistryResult<ArtifactLocation> {
            if self.versions.contains(&key.version) {
                Ok(ArtifactLocation::Opaque(key.version.clone()))
            } else {
                Err(RegistryError::NotFound {
                    model: key.model_name.clone(),
                    version: key.version.clone(),
                })
            }
        }

        fn load(&self, location: &ArtifactLocation) -> RegistryResult<Arc<dyn Recommender>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.load_delay);
            let ArtifactLocation::Opaque(version) = location else {
                unreachable!("fake registry only issues opaque locations")
            };
            if self.broken.contains(version) {
                return Err(RegistryError::Load {
                    location: version.clone(),
                    reason: "corrupt artifact".to_string(),
                });
            }
            let n = version.trim_start_matches('v').parse().unwrap_or(0);
            Ok(Arc::new(VersionEcho(n)))
        }

        fn metadata(&self, key: &ModelKey) -> RegistryResult<RegistryEntry> {
            let mut entry = RegistryEntry::unknown(key, &key.version);
            entry.git_sha = format!("sha-{}", key.version);
            entry.data_snapshot_id = format!("snap-{}", key.version);
            Ok(entry)
        }
    }

    fn setup(registry: FakeRegistry) -> (Arc<FakeRegistry>, Arc<MetricsCollector>, ModelVersionManager) {
        let registry = Arc::new(registry);
        let metrics = Arc::new(MetricsCollector::new());
        let manager = ModelVersionManager::new(
            "ALS",
            Arc::clone(&registry) as Arc<dyn ModelRegistry>,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            4,
        );
        (registry, metrics, manager)
    }

    #[tokio::test]
    async fn get_active_before_initialize() {
        let (_, _, manager) = setup(FakeRegistry::new(&["v1"]));
        assert_eq!(manager.get_active().await.unwrap_err(), ManagerError::NotInitialized);
        assert_eq!(manager.active_version().await, None);
    }

    #[tokio::test]
    async fn initialize_activates_startup_version() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1"]));
        let result = manager.initialize("v1").await.unwrap();

        assert_eq!(result.model_name, "als");
        assert_eq!(result.previous_version, None);
        assert_eq!(result.new_version, "v1");
        assert_eq!(result.registry_metadata.git_sha, "sha-v1");

        let active = manager.get_active().await.unwrap();
        assert_eq!(active.version(), "v1");
        assert_eq!(active.recommend(42, 10).unwrap(), vec![1]);

        assert_eq!(metrics.switch_count("none", "v1", SwitchStatus::Success), 1);
        let gauge = metrics.current_version().unwrap();
        assert_eq!(gauge.version, "v1");
        assert_eq!(gauge.git_sha, "sha-v1");
        assert_eq!(gauge.data_snapshot, "snap-v1");
    }

    #[tokio::test]
    async fn switch_back_and_forth_reports_previous() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1", "v2"]));
        manager.initialize("v1").await.unwrap();

        let first = manager.switch("v2").await.unwrap();
        assert_eq!(first.previous_version.as_deref(), Some("v1"));
        assert_eq!(manager.get_active().await.unwrap().version(), "v2");

        let second = manager.switch("v1").await.unwrap();
        assert_eq!(second.previous_version.as_deref(), Some("v2"));
        assert_eq!(second.new_version, "v1");

        let active = manager.get_active().await.unwrap();
        assert_eq!(active.version(), "v1");
        assert_eq!(active.recommend(0, 1).unwrap(), vec![1]);

        assert_eq!(metrics.switch_count("v1", "v2", SwitchStatus::Success), 1);
        assert_eq!(metrics.switch_count("v2", "v1", SwitchStatus::Success), 1);
        assert_eq!(metrics.current_version().unwrap().version, "v1");
    }

    #[tokio::test]
    async fn switch_to_missing_version_leaves_active() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1"]));
        manager.initialize("v1").await.unwrap();
        let before = manager.get_active().await.unwrap();

        let err = manager.switch("v3").await.unwrap_err();
        assert_eq!(err, ManagerError::VersionNotFound("v3".to_string()));

        let after = manager.get_active().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(metrics.switch_count("v1", "v3", SwitchStatus::NotFound), 1);
        assert_eq!(metrics.current_version().unwrap().version, "v1");
    }

    #[tokio::test]
    async fn switch_to_broken_artifact_is_load_error() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1"]).with_broken("v2"));
        manager.initialize("v1").await.unwrap();

        let err = manager.switch("v2").await.unwrap_err();
        assert!(matches!(err, ManagerError::LoadError { ref version, .. } if version == "v2"));

        assert_eq!(manager.active_version().await.as_deref(), Some("v1"));
        assert_eq!(manager.cached_versions().await, vec!["v1"]);
        assert_eq!(metrics.switch_count("v1", "v2", SwitchStatus::Error), 1);
    }

    #[tokio::test]
    async fn initialize_failure_leaves_manager_uninitialized() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1"]));
        assert!(manager.initialize("v0").await.is_err());
        assert_eq!(manager.get_active().await.unwrap_err(), ManagerError::NotInitialized);
        assert_eq!(metrics.switch_count("none", "v0", SwitchStatus::NotFound), 1);
    }

    #[tokio::test]
    async fn switching_to_cached_version_does_not_reload() {
        let (registry, _, manager) = setup(FakeRegistry::new(&["v1", "v2"]));
        manager.initialize("v1").await.unwrap();
        manager.switch("v2").await.unwrap();
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);

        manager.switch("v1").await.unwrap();
        manager.switch("v2").await.unwrap();
        manager.switch("v2").await.unwrap();
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_or_load_does_not_change_active() {
        let (registry, metrics, manager) = setup(FakeRegistry::new(&["v1", "v2"]));
        manager.initialize("v1").await.unwrap();

        let canary = manager.get_or_load("v2").await.unwrap();
        assert_eq!(canary.version(), "v2");
        assert_eq!(manager.active_version().await.as_deref(), Some("v1"));
        assert_eq!(manager.cached_versions().await, vec!["v1", "v2"]);

        // Second fetch is a cache hit, and no switch was recorded.
        manager.get_or_load("v2").await.unwrap();
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.total_switches(), 1);

        let err = manager.get_or_load("v9").await.unwrap_err();
        assert_eq!(err, ManagerError::VersionNotFound("v9".to_string()));
    }

    #[tokio::test]
    async fn cache_is_bounded_and_keeps_active() {
        let registry = Arc::new(FakeRegistry::new(&["v1", "v2", "v3", "v4"]));
        let metrics = Arc::new(MetricsCollector::new());
        let manager = ModelVersionManager::new(
            "als",
            Arc::clone(&registry) as Arc<dyn ModelRegistry>,
            metrics as Arc<dyn MetricsSink>,
            2,
        );

        for v in ["v1", "v2", "v3", "v4"] {
            manager.switch(v).await.unwrap();
        }
        let cached = manager.cached_versions().await;
        assert_eq!(cached.len(), 2);
        assert!(cached.contains(&"v4".to_string()));

        // v1 was evicted, so switching back loads it again.
        manager.switch("v1").await.unwrap();
        assert_eq!(registry.loads.load(Ordering::SeqCst), 5);
        assert_eq!(manager.get_active().await.unwrap().version(), "v1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_are_not_blocked_by_slow_load() {
        let (_, _, manager) =
            setup(FakeRegistry::new(&["v1", "v2"]).with_load_delay(Duration::from_millis(300)));
        let manager = Arc::new(manager);
        manager.initialize("v1").await.unwrap();

        let switch = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.switch("v2").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let active = tokio::time::timeout(Duration::from_millis(100), manager.get_active())
            .await
            .expect("get_active blocked behind a load")
            .unwrap();
        assert_eq!(active.version(), "v1");

        switch.await.unwrap().unwrap();
        assert_eq!(manager.get_active().await.unwrap().version(), "v2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_old_or_new_model() {
        let (_, _, manager) =
            setup(FakeRegistry::new(&["v1", "v2"]).with_load_delay(Duration::from_millis(5)));
        let manager = Arc::new(manager);
        manager.initialize("v1").await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let active = manager.get_active().await.unwrap();
                    let served = active.recommend(0, 1).unwrap();
                    let expected = if active.version() == "v1" { 1 } else { 2 };
                    assert_eq!(served, vec![expected]);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for v in ["v2", "v1", "v2"] {
            manager.switch(v).await.unwrap();
        }
        for r in readers {
            r.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_switches_record_every_attempt() {
        let (_, metrics, manager) = setup(FakeRegistry::new(&["v1", "v2", "v3"]));
        let manager = Arc::new(manager);
        manager.initialize("v1").await.unwrap();

        let targets = ["v1", "v2", "v3", "v404"];
        let handles: Vec<_> = (0..40)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let target = targets[i % targets.len()];
                tokio::spawn(async move { manager.switch(target).await })
            })
            .collect();

        let mut failures = 0;
        for h in handles {
            if h.await.unwrap().is_err() {
                failures += 1;
            }
        }

        assert_eq!(failures, 10);
        assert_eq!(metrics.total_switches(), 41);
        let active = manager.active_version().await.unwrap();
        assert!(["v1", "v2", "v3"].contains(&active.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_load_loads_once() {
        let (registry, _, manager) =
            setup(FakeRegistry::new(&["v1", "v2"]).with_load_delay(Duration::from_millis(200)));
        let manager = Arc::new(manager);
        manager.initialize("v1").await.unwrap();
        assert_eq!(registry.loads.load(Ordering::SeqCst), 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_load("v2").await })
            })
            .collect();
        let mut models = Vec::new();
        for h in handles {
            models.push(h.await.unwrap().unwrap());
        }

        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        assert_eq!(manager.active_version().await.as_deref(), Some("v1"));
        assert!(manager.load_gates.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn switch_and_get_or_load_share_one_load() {
        let (registry, _, manager) =
            setup(FakeRegistry::new(&["v1", "v2"]).with_load_delay(Duration::from_millis(100)));
        let manager = Arc::new(manager);
        manager.initialize("v1").await.unwrap();

        let reader = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_or_load("v2").await })
        };
        manager.switch("v2").await.unwrap();
        reader.await.unwrap().unwrap();

        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
        assert_eq!(manager.active_version().await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn switch_with_commits_before_next_switch() {
        let (_, _, manager) = setup(FakeRegistry::new(&["v1", "v2"]));
        let committed = Arc::new(std::sync::Mutex::new(Vec::new()));

        for v in ["v1", "v2"] {
            let committed = Arc::clone(&committed);
            manager
                .switch_with(v, |version| async move {
                    committed.lock().unwrap().push(version);
                })
                .await
                .unwrap();
        }
        let missing = {
            let committed = Arc::clone(&committed);
            manager
                .switch_with("v9", |version| async move {
                    committed.lock().unwrap().push(version);
                })
                .await
        };

        assert!(missing.is_err());
        assert_eq!(*committed.lock().unwrap(), vec!["v1", "v2"]);
    }

    #[test]
    fn switch_result_serializes() {
        let key = ModelKey::new("als", "v2");
        let result = SwitchResult {
            model_name: "als".to_string(),
            previous_version: Some("v1".to_string()),
            new_version: "v2".to_string(),
            registry_metadata: RegistryEntry::unknown(&key, "/models/v2/als"),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["previous_version"], "v1");
        assert_eq!(value["new_version"], "v2");
        assert_eq!(value["registry_metadata"]["artifact_location"], "/models/v2/als");
    }
}
