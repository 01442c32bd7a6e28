//! Two-tier cache: a TTL-bounded fresh store plus a historical store that
//! keeps the last good value per key for stale-but-available reads.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Fresh store capacity; the historical store holds twice as many.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            max_size: 100,
        }
    }
}

/// Which tier answered a [`ResilientCache::get_or_fetch`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheHit<V> {
    Fresh(V),
    Fetched(V),
    Historical(V),
}

impl<V> CacheHit<V> {
    pub fn into_inner(self) -> V {
        match self {
            CacheHit::Fresh(v) | CacheHit::Fetched(v) | CacheHit::Historical(v) => v,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CacheHit::Historical(_))
    }
}

#[derive(Debug)]
struct FreshEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Expires by age, evicts least-recently-used beyond capacity.
#[derive(Debug)]
struct FreshStore<V> {
    entries: IndexMap<String, FreshEntry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> FreshStore<V> {
    fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            ttl,
            capacity,
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let index = self.entries.get_index_of(key)?;
        let expired = self
            .entries
            .get_index(index)
            .is_some_and(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl);

        if expired {
            self.entries.shift_remove_index(index);
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: &str, value: V) {
        self.entries.shift_remove(key);
        self.entries.insert(
            key.to_string(),
            FreshEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        self.purge_expired();
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.ttl)
    }
}

/// Never expires; evicts least-recently-used beyond capacity.
#[derive(Debug)]
struct HistoricalStore<V> {
    entries: IndexMap<String, V>,
    capacity: usize,
}

impl<V: Clone> HistoricalStore<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: &str, value: V) {
        self.entries.shift_remove(key);
        self.entries.insert(key.to_string(), value);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }
}

#[derive(Debug)]
struct Stores<V> {
    fresh: FreshStore<V>,
    historical: HistoricalStore<V>,
}

/// Shared by all requests; every operation takes the single store lock, and
/// the lock is never held while a fetch is running.
///
/// Concurrent misses on the same key each run their own fetch.
#[derive(Debug)]
pub struct ResilientCache<V> {
    stores: Mutex<Stores<V>>,
    config: CacheConfig,
}

impl<V: Clone> ResilientCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let stores = Stores {
            fresh: FreshStore::new(config.ttl, config.max_size),
            historical: HistoricalStore::new(config.max_size.saturating_mul(2)),
        };
        Self {
            stores: Mutex::new(stores),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fresh value if present, else the historical one.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut stores = self.stores.lock();
        stores
            .fresh
            .get(key)
            .or_else(|| stores.historical.get(key))
    }

    pub fn get_fresh(&self, key: &str) -> Option<V> {
        self.stores.lock().fresh.get(key)
    }

    pub fn get_historical(&self, key: &str) -> Option<V> {
        self.stores.lock().historical.get(key)
    }

    /// Fresh hit, else the fetch result (stored in both tiers), else the
    /// historical value when the fetch fails.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Option<CacheHit<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if let Some(value) = self.get_fresh(key) {
            debug!(key, "Cache hit");
            return Some(CacheHit::Fresh(value));
        }

        match fetch().await {
            Ok(value) => {
                self.set(key, value.clone());
                Some(CacheHit::Fetched(value))
            }
            Err(e) => {
                let stale = self.get_historical(key);
                warn!(
                    key,
                    error = %e,
                    serving_stale = stale.is_some(),
                    "Fetch failed on cache miss"
                );
                stale.map(CacheHit::Historical)
            }
        }
    }

    /// Writes both tiers under one lock.
    pub fn set(&self, key: &str, value: V) {
        let mut stores = self.stores.lock();
        stores.historical.insert(key, value.clone());
        stores.fresh.insert(key, value);
    }

    /// Drops the fresh entry; the historical copy is kept.
    pub fn invalidate(&self, key: &str) -> bool {
        self.stores.lock().fresh.remove(key)
    }

    /// Empties the fresh store; historical entries survive.
    pub fn clear(&self) {
        self.stores.lock().fresh.entries.clear();
    }

    pub fn contains_fresh(&self, key: &str) -> bool {
        self.stores.lock().fresh.contains(key)
    }

    pub fn fresh_len(&self) -> usize {
        self.stores.lock().fresh.entries.len()
    }

    pub fn historical_len(&self) -> usize {
        self.stores.lock().historical.entries.len()
    }
}

impl<V: Clone> Default for ResilientCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
