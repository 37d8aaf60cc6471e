use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::FundConfiguration;
use crate::forecast::ForecastResult;
use crate::EngineResult;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Bounded forecast cache with first-in-first-out eviction.
///
/// Eviction follows insertion order only; a frequently read entry is evicted
/// as soon as it is the oldest. Reads take a shared lock, inserts an
/// exclusive one, so the eviction order holds under concurrent writers.
#[derive(Debug)]
pub struct ForecastCache {
    capacity: usize,
    inner: RwLock<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Arc<ForecastResult>>,
    order: VecDeque<String>,
}

impl Default for ForecastCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ForecastCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Canonical key: the configuration's JSON serialization. Field order is
    /// fixed by the struct definitions and maps are ordered, so equal
    /// configurations produce equal keys.
    pub fn key_for(config: &FundConfiguration) -> EngineResult<String> {
        Ok(serde_json::to_string(config)?)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ForecastResult>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Insert a result, evicting the oldest entries once at capacity. When
    /// another writer got there first the existing entry wins.
    pub fn insert(&self, key: String, result: Arc<ForecastResult>) -> Arc<ForecastResult> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(&key) {
            return Arc::clone(existing);
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            tracing::debug!(key_len = oldest.len(), "forecast cache eviction");
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, Arc::clone(&result));
        result
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
    }
}
