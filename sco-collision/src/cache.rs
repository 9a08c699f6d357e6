//! Bounded collision-result cache.
//!
//! Keyed by a fingerprint of (configuration, joint-vector pair); entries
//! are immutable snapshots behind `Arc` so evaluators can hand them out
//! without copying. Eviction is LRU with a fixed capacity. The cache is
//! the only shared resource in a solve; a mutex serializes access and the
//! snapshots themselves are read-only.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::gradients::GradientResultsSet;
use crate::types::ContactResultMap;

/// Contact results and their reduction, as cached by the evaluators.
#[derive(Debug, Clone, Default)]
pub struct CollisionCacheData {
    pub contact_results_map: ContactResultMap,
    pub gradient_results_sets: Vec<GradientResultsSet>,
}

/// Cache key for a (config, x0, x1) triple.
pub fn cache_key(config_fingerprint: u64, x0: &[f64], x1: &[f64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    config_fingerprint.hash(&mut hasher);
    for v in x0 {
        v.to_bits().hash(&mut hasher);
    }
    0xa5a5_a5a5u64.hash(&mut hasher);
    for v in x1 {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

struct LruInner {
    capacity: usize,
    map: HashMap<u64, Arc<CollisionCacheData>>,
    order: VecDeque<u64>,
}

/// Fixed-capacity LRU cache of collision snapshots.
pub struct CollisionCache {
    inner: Mutex<LruInner>,
}

impl CollisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                capacity: capacity.max(1),
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Fetch a snapshot, marking it most recently used.
    pub fn get(&self, key: u64) -> Option<Arc<CollisionCacheData>> {
        let mut inner = self.inner.lock().expect("collision cache poisoned");
        let hit = inner.map.get(&key).cloned();
        if hit.is_some() {
            if let Some(pos) = inner.order.iter().position(|&k| k == key) {
                inner.order.remove(pos);
            }
            inner.order.push_back(key);
        }
        hit
    }

    /// Insert a snapshot, evicting the least recently used entry when full.
    pub fn put(&self, key: u64, data: Arc<CollisionCacheData>) {
        let mut inner = self.inner.lock().expect("collision cache poisoned");
        if inner.map.contains_key(&key) {
            if let Some(pos) = inner.order.iter().position(|&k| k == key) {
                inner.order.remove(pos);
            }
        } else if inner.map.len() >= inner.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        inner.map.insert(key, data);
        inner.order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("collision cache poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("collision cache poisoned");
        inner.map.clear();
        inner.order.clear();
    }
}
