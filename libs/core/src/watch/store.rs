//! Per-resource-type indexed mirrors of cluster state (the data model's "Store" entry).
//! Exactly one `Store` exists per watched type; its contents are kept consistent with the
//! last informer event by the owning `Watcher`. Renderer reads these through `list()`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// A resource's store key: the tuple produced by evaluating `index_by` JSONPath expressions
/// against it, stringified component-wise so it orders deterministically.
pub type StoreKey = Vec<String>;

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub items: Vec<(StoreKey, serde_json::Value)>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fetches a resource body on demand, for `OnDemandStore`. Backed by the Kubernetes client
/// in production; trivially fakeable in tests.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, key: &StoreKey) -> Option<serde_json::Value>;
}

#[async_trait]
pub trait Store: Send + Sync {
    fn upsert(&self, key: StoreKey, value: serde_json::Value);
    fn remove(&self, key: &StoreKey);
    async fn list(&self) -> StoreSnapshot;
    fn len(&self) -> usize;
}

/// Holds the entire resource body in memory, keyed by its index.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<StoreKey, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn upsert(&self, key: StoreKey, value: serde_json::Value) {
        self.items.write().unwrap().insert(key, value);
    }

    fn remove(&self, key: &StoreKey) {
        self.items.write().unwrap().remove(key);
    }

    async fn list(&self) -> StoreSnapshot {
        let items = self.items.read().unwrap();
        StoreSnapshot {
            items: items.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }
}

/// Holds only keys; bodies are fetched lazily and cached for `cache_ttl` so a failed render
/// cycle still retains resources for the next attempt.
pub struct OnDemandStore {
    keys: RwLock<BTreeSet<StoreKey>>,
    cache: RwLock<HashMap<StoreKey, (Instant, serde_json::Value)>>,
    cache_ttl: Duration,
    fetcher: std::sync::Arc<dyn ResourceFetcher>,
}

impl OnDemandStore {
    pub fn new(cache_ttl: Duration, fetcher: std::sync::Arc<dyn ResourceFetcher>) -> Self {
        Self {
            keys: RwLock::new(BTreeSet::new()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
            fetcher,
        }
    }
}

#[async_trait]
impl Store for OnDemandStore {
    fn upsert(&self, key: StoreKey, _value: serde_json::Value) {
        // on-demand: only the key is retained, the body is fetched on read
        self.keys.write().unwrap().insert(key);
    }

    fn remove(&self, key: &StoreKey) {
        self.keys.write().unwrap().remove(key);
        self.cache.write().unwrap().remove(key);
    }

    async fn list(&self) -> StoreSnapshot {
        let keys: Vec<StoreKey> = self.keys.read().unwrap().iter().cloned().collect();
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let cached = self
                .cache
                .read()
                .unwrap()
                .get(&key)
                .filter(|(fetched_at, _)| fetched_at.elapsed() < self.cache_ttl)
                .map(|(_, value)| value.clone());
            let value = match cached {
                Some(value) => value,
                None => match self.fetcher.fetch(&key).await {
                    Some(value) => {
                        self.cache
                            .write()
                            .unwrap()
                            .insert(key.clone(), (Instant::now(), value.clone()));
                        value
                    }
                    None => continue,
                },
            };
            items.push((key, value));
        }
        StoreSnapshot { items }
    }

    fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }
}

/// Cache TTL for on-demand stores: 2.2x the drift-prevention interval, so a failed render
/// cycle still has resources available for the next attempt.
pub fn on_demand_cache_ttl(drift_prevention_interval: Duration) -> Duration {
    drift_prevention_interval.mul_f64(2.2)
}
