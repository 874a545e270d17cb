//! Bounded cache of loaded model versions with LRU eviction.
//!
//! Lookups take `&self` and record access time in a per-entry atomic, so
//! the manager can serve cache hits under a shared read lock. Only inserts
//! (and the evictions they trigger) need exclusive access.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use recserve_registry::ModelKey;
use tracing::debug;

use crate::manager::LoadedModel;

struct CacheEntry {
    model: Arc<LoadedModel>,
    /// Nanos since cache creation.
    last_accessed_nanos: AtomicU64,
}

pub struct ModelCache {
    entries: HashMap<ModelKey, CacheEntry>,
    capacity: usize,
    epoch: Instant,
}

impl ModelCache {
    /// A cache holding at most `capacity` versions (minimum 1).
    ///
    /// A pinned entry is never evicted, so when every other slot is taken
    /// the cache may briefly hold `capacity + 1` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            epoch: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<LoadedModel>> {
        let entry = self.entries.get(key)?;
        entry
            .last_accessed_nanos
            .store(self.now_nanos(), Ordering::Relaxed);
        Some(Arc::clone(&entry.model))
    }

    /// Insert `model`, evicting least-recently-used entries other than
    /// `pinned` and the new key to stay within capacity.
    ///
    /// If the key is already cached the existing instance is kept and
    /// returned.
    pub fn insert(&mut self, model: Arc<LoadedModel>, pinned: Option<&ModelKey>) -> Arc<LoadedModel> {
        if let Some(existing) = self.get(&model.key) {
            return existing;
        }

        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(k, _)| Some(*k) != pinned)
                .min_by_key(|(_, e)| e.last_accessed_nanos.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!(%key, "evicted cached model");
                }
                None => break,
            }
        }

        let key = model.key.clone();
        self.entries.insert(
            key,
            CacheEntry {
                model: Arc::clone(&model),
                last_accessed_nanos: AtomicU64::new(self.now_nanos()),
            },
        );
        model
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}
