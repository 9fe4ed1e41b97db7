use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::bus::{InvalidationBus, Subscriber, Subscription};
use crate::keys::QueryKey;

struct CacheEntry {
    value: Value,
    stale: bool,
    fetched_at: DateTime<Utc>,
}

/// Per-query result cache. Entries are marked stale by the invalidation bus
/// and re-fetched on their next read.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the cache for every publication on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &InvalidationBus) -> Subscription {
        bus.subscribe(QueryKey::root(), self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached value for `key` unless it is missing or stale, in
    /// which case `fetch` runs and its result replaces the entry.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(cached) = self.fresh(key) {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => return value,
                Err(e) => debug!("Cached {key} has a different shape, refetching: {e}"),
            }
        }

        let value = fetch().await;
        match serde_json::to_value(&value) {
            Ok(json) => {
                self.lock().insert(
                    key.clone(),
                    CacheEntry {
                        value: json,
                        stale: false,
                        fetched_at: Utc::now(),
                    },
                );
            }
            Err(e) => debug!("Result for {key} is not cacheable: {e}"),
        }
        value
    }

    fn fresh(&self, key: &QueryKey) -> Option<Value> {
        self.lock()
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.value.clone())
    }

    /// `None` when nothing is cached for `key`.
    pub fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        self.lock().get(key).map(|entry| entry.stale)
    }

    pub fn fetched_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.lock().get(key).map(|entry| entry.fetched_at)
    }

    /// Marks every entry whose key is a prefix of `published` stale.
    pub fn invalidate(&self, published: &QueryKey) -> usize {
        let mut marked = 0;
        for (key, entry) in self.lock().iter_mut() {
            if key.is_prefix_of(published) && !entry.stale {
                entry.stale = true;
                marked += 1;
            }
        }
        marked
    }
}

impl Subscriber for QueryCache {
    fn on_invalidate(&self, keys: &[QueryKey]) -> anyhow::Result<()> {
        let marked: usize = keys.iter().map(|k| self.invalidate(k)).sum();
        debug!("Marked {marked} cached queries stale");
        Ok(())
    }
}
