//! Bounded in-memory store of per-request provenance traces.
//!
//! Holds at most `capacity` traces; inserting beyond that evicts the oldest
//! entry. Re-storing an existing request id refreshes its position.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Provenance of one served recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub request_id: String,
    pub user_id: u64,
    pub model_name: String,
    pub model_version: String,
    pub variant: Option<String>,
    pub shadow_version: Option<String>,
    pub git_sha: String,
    pub data_snapshot_id: String,
    pub environment: String,
    pub item_count: usize,
    pub latency_ms: u64,
    /// Unix seconds; set by the store.
    pub stored_at: u64,
}

struct Traces {
    records: HashMap<String, TraceRecord>,
    order: VecDeque<String>,
}

pub struct TraceStore {
    inner: Mutex<Traces>,
    capacity: usize,
}

impl TraceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Traces {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn store(&self, mut record: TraceRecord) {
        record.stored_at = epoch_secs();
        let id = record.request_id.clone();

        let mut traces = self.inner.lock().await;
        if traces.records.insert(id.clone(), record).is_some() {
            traces.order.retain(|existing| existing != &id);
        }
        traces.order.push_back(id);

        while traces.order.len() > self.capacity {
            if let Some(oldest) = traces.order.pop_front() {
                traces.records.remove(&oldest);
                debug!(request_id = %oldest, "evicted trace");
            }
        }
    }

    pub async fn get(&self, request_id: &str) -> Option<TraceRecord> {
        self.inner.lock().await.records.get(request_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
