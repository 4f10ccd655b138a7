//! TTL + LRU response cache with stale fallback and request coalescing.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cache::coalesce::InFlightRegistry;
use crate::cache::key::cache_key;
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::upstream::types::UpstreamResult;

#[derive(Debug)]
struct CacheEntry {
    owner: String,
    payload: Value,
    created_at: Instant,
    expires_at: Instant,
    hits: u64,
    /// Position in the recency index.
    tick: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Entries plus a recency index ordered from least to most recently used.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<CacheEntry> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key)
    }
}

/// A payload answered from the cache or a fresh fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: Value,
    pub from_cache: bool,
    pub cache_age: Option<Duration>,
    /// Served past its TTL because the fetch failed.
    pub stale: bool,
}

/// A cached entry read without touching recency or expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub payload: Value,
    pub age: Duration,
    pub expired: bool,
}

/// Per-owner cache stats.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OwnerStats {
    pub count: usize,
    pub hits: u64,
}

/// Point-in-time cache stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub total_hits: u64,
    /// Entries past their TTL that no sweep or access has removed yet.
    pub expired: usize,
    /// Hits per stored entry.
    pub hit_rate: f64,
    pub in_flight: usize,
    pub by_owner: BTreeMap<String, OwnerStats>,
}

/// Process-wide response cache shared by all upstream clients.
pub struct ResponseCache {
    max_size: usize,
    default_ttl: Duration,
    state: Mutex<CacheState>,
    inflight: InFlightRegistry,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.max_size, Duration::from_millis(config.default_ttl_ms))
    }

    pub fn with_capacity(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
            state: Mutex::new(CacheState::default()),
            inflight: InFlightRegistry::new(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Live payload for `key`. Expired entries are purged and report a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock().expect("response cache mutex poisoned");
        let now = Instant::now();
        let expired = state.entries.get(key)?.is_expired(now);
        if expired {
            state.remove(key);
            metrics::record_cache_size(state.entries.len());
            return None;
        }
        state.touch(key);
        state.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            tracing::debug!(upstream = %entry.owner, hits = entry.hits, "cache hit");
            entry.payload.clone()
        })
    }

    /// Read an entry even if expired, without changing recency.
    pub fn peek(&self, key: &str) -> Option<CachedValue> {
        let state = self.state.lock().expect("response cache mutex poisoned");
        let now = Instant::now();
        state.entries.get(key).map(|entry| CachedValue {
            payload: entry.payload.clone(),
            age: now.duration_since(entry.created_at),
            expired: entry.is_expired(now),
        })
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn set(&self, key: &str, payload: Value, owner: &str, ttl: Duration) {
        let mut state = self.state.lock().expect("response cache mutex poisoned");

        // a replaced key does not need room
        if state.remove(key).is_none() && state.entries.len() >= self.max_size {
            if let Some(evicted) = state.evict_lru() {
                tracing::debug!(upstream = %evicted.owner, hits = evicted.hits, "evicted LRU entry");
                metrics::record_cache_eviction();
            }
        }

        let now = Instant::now();
        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.to_string());
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                owner: owner.to_string(),
                payload,
                created_at: now,
                expires_at: now + ttl,
                hits: 0,
                tick,
            },
        );
        metrics::record_cache_size(state.entries.len());
        tracing::debug!(upstream = %owner, ttl_ms = ttl.as_millis() as u64, "cache set");
    }

    /// Answer from cache when fresh, otherwise fetch and store.
    ///
    /// An expired entry is kept until the fetch settles so a failed fetch can
    /// still be answered with it, marked stale.
    pub async fn execute_with_cache<F, Fut>(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
        fetcher: F,
    ) -> UpstreamResult<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UpstreamResult<Value>>,
    {
        if let Some(hit) = self.fresh_hit(key) {
            metrics::record_cache_hit(owner);
            return Ok(hit);
        }
        metrics::record_cache_miss(owner);

        match fetcher().await {
            Ok(payload) => {
                self.set(key, payload.clone(), owner, ttl);
                Ok(CacheLookup {
                    payload,
                    from_cache: false,
                    cache_age: None,
                    stale: false,
                })
            }
            Err(e) => match self.peek(key) {
                Some(cached) => {
                    tracing::warn!(upstream = %owner, error = %e, "fetch failed, serving stale cache");
                    Ok(CacheLookup {
                        payload: cached.payload,
                        from_cache: true,
                        cache_age: Some(cached.age),
                        stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    fn fresh_hit(&self, key: &str) -> Option<CacheLookup> {
        let mut state = self.state.lock().expect("response cache mutex poisoned");
        let now = Instant::now();
        let entry = state.entries.get_mut(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.hits += 1;
        let lookup = CacheLookup {
            payload: entry.payload.clone(),
            from_cache: true,
            cache_age: Some(now.duration_since(entry.created_at)),
            stale: false,
        };
        tracing::debug!(upstream = %entry.owner, hits = entry.hits, "cache hit");
        state.touch(key);
        Some(lookup)
    }

    /// Like [`execute_with_cache`](Self::execute_with_cache), but concurrent
    /// callers for the same key share one fetch and one outcome.
    pub async fn coalesce<F, Fut>(
        self: &Arc<Self>,
        owner: &str,
        params: &Value,
        ttl: Duration,
        fetcher: F,
    ) -> UpstreamResult<CacheLookup>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = UpstreamResult<Value>> + Send + 'static,
    {
        let key = cache_key(owner, params);
        let (fetch, started) = self.inflight.join_or_start(&key, || {
            let cache = Arc::clone(self);
            let key = key.clone();
            let owner = owner.to_string();
            async move {
                let result = cache.execute_with_cache(&key, &owner, ttl, fetcher).await;
                cache.inflight.remove(&key);
                result
            }
            .boxed()
        });
        if !started {
            tracing::debug!(upstream = %owner, "coalescing with in-flight request");
        }
        fetch.await
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut state = self.state.lock().expect("response cache mutex poisoned");
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        metrics::record_cache_size(state.entries.len());
        expired.len()
    }

    /// Remove all entries owned by one upstream.
    pub fn invalidate(&self, owner: &str) -> usize {
        let mut state = self.state.lock().expect("response cache mutex poisoned");
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        metrics::record_cache_size(state.entries.len());
        tracing::info!(upstream = %owner, removed = keys.len(), "cache invalidated");
        keys.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("response cache mutex poisoned");
        *state = CacheState::default();
        metrics::record_cache_size(0);
        tracing::info!("cache cleared");
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("response cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("response cache mutex poisoned");
        let now = Instant::now();
        let mut total_hits = 0;
        let mut expired = 0;
        let mut by_owner: BTreeMap<String, OwnerStats> = BTreeMap::new();

        for entry in state.entries.values() {
            total_hits += entry.hits;
            if entry.is_expired(now) {
                expired += 1;
            }
            let owner = by_owner.entry(entry.owner.clone()).or_default();
            owner.count += 1;
            owner.hits += entry.hits;
        }

        let size = state.entries.len();
        CacheStats {
            size,
            max_size: self.max_size,
            total_hits,
            expired,
            hit_rate: if size > 0 { total_hits as f64 / size as f64 } else { 0.0 },
            in_flight: self.inflight.len(),
            by_owner,
        }
    }

    /// Periodically sweep expired entries until shutdown is signalled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::info!(removed, "swept expired cache entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}
