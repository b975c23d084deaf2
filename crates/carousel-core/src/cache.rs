//! Segment cache
//!
//! Quota-bounded, persisted store of fetched media responses:
//! - Read-through fetching with stale-while-revalidate
//! - Stale fallback when the network fails
//! - Pluggable eviction (LRU by default) enforcing size and count limits
//! - Periodic expiry sweep
//! - Low-priority preloading
//!
//! Cache failures never reach callers of [`SegmentCache::fetch_through_cache`];
//! they are logged and counted.

use crate::{
    config::{CacheConfig, EvictionPolicy},
    fetch::{FetchPriority, FetchResponse, Fetcher},
    storage::{load_json, save_json, BlobStore, KeyValueStore},
    CacheEntry, Error, Result,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Ranks entries for eviction
pub trait EvictionStrategy: Send + Sync {
    /// Sort `entries` so the first element is evicted first
    fn rank(&self, entries: &mut Vec<&CacheEntry>);

    fn name(&self) -> &'static str;
}

/// Oldest `last_accessed` first
pub struct LeastRecentlyUsed;

impl EvictionStrategy for LeastRecentlyUsed {
    fn rank(&self, entries: &mut Vec<&CacheEntry>) {
        entries.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then(a.access_seq.cmp(&b.access_seq))
        });
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// Oldest `stored_at` first
pub struct FirstInFirstOut;

impl EvictionStrategy for FirstInFirstOut {
    fn rank(&self, entries: &mut Vec<&CacheEntry>) {
        entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then(a.key.cmp(&b.key)));
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

/// Largest payload first
pub struct LargestFirst;

impl EvictionStrategy for LargestFirst {
    fn rank(&self, entries: &mut Vec<&CacheEntry>) {
        entries.sort_by(|a, b| {
            b.size_bytes
                .cmp(&a.size_bytes)
                .then(a.last_accessed.cmp(&b.last_accessed))
        });
    }

    fn name(&self) -> &'static str {
        "largest"
    }
}

/// Strategy implementing a configured policy
pub fn strategy_for(policy: EvictionPolicy) -> Box<dyn EvictionStrategy> {
    match policy {
        EvictionPolicy::LeastRecentlyUsed => Box::new(LeastRecentlyUsed),
        EvictionPolicy::FirstInFirstOut => Box::new(FirstInFirstOut),
        EvictionPolicy::LargestFirst => Box::new(LargestFirst),
    }
}

/// Response metadata stored alongside a payload
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Overrides the configured default TTL
    pub max_age: Option<Duration>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub revalidations: u64,
    pub evictions: u64,
    pub expired: u64,
    pub rejected: u64,
    pub write_errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    access_seq: u64,
    /// Access times changed since the index was last persisted
    dirty: bool,
    stats: CacheStats,
}

impl CacheState {
    fn insert(&mut self, entry: CacheEntry) {
        if let Some(old) = self.entries.remove(&entry.key) {
            self.total_bytes -= old.size_bytes;
        }
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }
}

/// Process-wide segment cache, owned by the engine root
pub struct SegmentCache {
    config: CacheConfig,
    index_store: Arc<dyn KeyValueStore>,
    blobs: Arc<dyn BlobStore>,
    fetcher: Arc<dyn Fetcher>,
    strategy: Box<dyn EvictionStrategy>,
    state: Mutex<CacheState>,
    revalidating: Mutex<HashSet<String>>,
    preloads: Mutex<HashMap<String, JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SegmentCache {
    /// Create a cache using the configured eviction policy
    pub fn new(
        config: CacheConfig,
        index_store: Arc<dyn KeyValueStore>,
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let strategy = strategy_for(config.eviction_policy);
        Self {
            config,
            index_store,
            blobs,
            fetcher,
            strategy,
            state: Mutex::new(CacheState::default()),
            revalidating: Mutex::new(HashSet::new()),
            preloads: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Replace the eviction strategy
    pub fn with_strategy(mut self, strategy: Box<dyn EvictionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn index_key(&self) -> String {
        format!("{}/index", self.config.namespace)
    }

    /// Load the persisted index, drop expired entries and enforce limits
    #[instrument(skip(self))]
    pub async fn init(&self) {
        match load_json::<Vec<CacheEntry>>(self.index_store.as_ref(), &self.index_key()).await {
            Ok(Some(entries)) => {
                let mut state = self.state.lock().await;
                for entry in entries {
                    state.access_seq = state.access_seq.max(entry.access_seq);
                    state.insert(entry);
                }
                info!(
                    entries = state.entries.len(),
                    bytes = state.total_bytes,
                    policy = self.strategy.name(),
                    "Cache index loaded"
                );
            }
            Ok(None) => debug!("No persisted cache index"),
            Err(e) => warn!(error = %e, "Discarding unreadable cache index"),
        }

        self.sweep_expired().await;
        self.evict().await;
    }

    /// Start the periodic expiry sweep
    pub async fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::downgrade(self);
        let interval = self.config.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                cache.sweep_expired().await;
            }
        });

        if let Some(old) = self.sweeper.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Stop background work and persist the index
    pub async fn dispose(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        self.cancel_preloads().await;
        let state = self.state.lock().await;
        self.persist(&state).await;
    }

    /// True if a fresh entry exists for `url`
    pub async fn is_cached(&self, url: &Url) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .get(url.as_str())
            .is_some_and(|e| !e.is_expired(Utc::now()))
    }

    /// Fresh cached payload for `url`, updating its access time
    pub async fn get(&self, url: &Url) -> Option<Bytes> {
        self.lookup(url, false).await.map(|(data, _)| data)
    }

    /// Store a payload. Oversized payloads are rejected; limits are enforced afterwards.
    #[instrument(skip(self, data, meta), fields(url = %url, bytes = data.len()))]
    pub async fn put(&self, url: &Url, data: Bytes, meta: ResponseMeta) -> Result<()> {
        let size = data.len() as u64;
        let limit = self.config.max_entry_bytes();

        if size > limit {
            self.state.lock().await.stats.rejected += 1;
            debug!(limit, "Entry too large to cache");
            return Err(Error::EntryTooLarge { size, limit });
        }

        let mut state = self.state.lock().await;

        if let Err(e) = self.blobs.write(url.as_str(), data).await {
            state.stats.write_errors += 1;
            warn!(error = %e, "Cache payload write failed");
            return Err(Error::cache(format!("payload write failed: {}", e)));
        }

        let now = Utc::now();
        let ttl = meta.max_age.unwrap_or_else(|| self.config.default_ttl());
        let access_seq = state.next_seq();
        state.insert(CacheEntry {
            key: url.to_string(),
            size_bytes: size,
            last_accessed: now,
            stored_at: now,
            expires_at: expiry(now, ttl),
            etag: meta.etag,
            content_type: meta.content_type,
            access_seq,
        });

        if self.over_limits(&state) {
            self.evict_locked(&mut state).await;
        }
        self.persist(&state).await;

        debug!(total_bytes = state.total_bytes, entries = state.entries.len(), "Cached");
        Ok(())
    }

    /// Evict entries until the size and count limits hold. Returns the number evicted.
    pub async fn evict(&self) -> usize {
        let mut state = self.state.lock().await;
        let evicted = self.evict_locked(&mut state).await;
        if evicted > 0 {
            self.persist(&state).await;
        }
        evicted
    }

    /// Remove every expired entry regardless of size pressure
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
            self.delete_blob(key).await;
        }
        state.stats.expired += expired.len() as u64;

        if !expired.is_empty() || state.dirty {
            self.persist(&state).await;
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "Expired cache entries swept");
        }
        expired.len()
    }

    /// Read through the cache at normal priority
    pub async fn fetch_through_cache(self: &Arc<Self>, url: &Url) -> Result<Bytes> {
        self.fetch_with_priority(url, FetchPriority::Normal).await
    }

    /// Read through the cache.
    ///
    /// A fresh hit returns immediately and may trigger a background
    /// revalidation. A miss goes to the network; when that fails, any
    /// existing entry (even an expired one) is served instead of the error.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_with_priority(self: &Arc<Self>, url: &Url, priority: FetchPriority) -> Result<Bytes> {
        if let Some((data, entry)) = self.lookup(url, false).await {
            if self.config.stale_while_revalidate {
                self.spawn_revalidation(url.clone(), entry.etag.clone()).await;
            }
            return Ok(data);
        }

        let stale = self.lookup(url, true).await;
        self.state.lock().await.stats.misses += 1;

        let etag = stale.as_ref().and_then(|(_, e)| e.etag.clone());
        match self.fetcher.fetch(url, etag.as_deref(), priority).await {
            Ok(FetchResponse::Fresh {
                body,
                etag,
                content_type,
                max_age,
            }) => {
                let meta = ResponseMeta {
                    etag,
                    content_type,
                    max_age,
                };
                if let Err(e) = self.put(url, body.clone(), meta).await {
                    debug!(error = %e, "Response not cached");
                }
                Ok(body)
            }
            Ok(FetchResponse::NotModified { max_age }) => match stale {
                Some((data, _)) => {
                    self.refresh_expiry(url, max_age).await;
                    Ok(data)
                }
                None => Err(Error::Internal(format!("unexpected 304 for {}", url))),
            },
            Err(e) => match stale {
                Some((data, _)) => {
                    self.state.lock().await.stats.stale_served += 1;
                    warn!(error = %e, "Network failed, serving cached copy");
                    Ok(data)
                }
                None => Err(e),
            },
        }
    }

    /// Fetch `url` into the cache in the background
    pub async fn preload(self: &Arc<Self>, url: &Url, priority: FetchPriority) {
        if self.is_cached(url).await {
            return;
        }

        let mut preloads = self.preloads.lock().await;
        preloads.retain(|_, handle| !handle.is_finished());
        if preloads.contains_key(url.as_str()) {
            return;
        }

        let cache = Arc::clone(self);
        let target = url.clone();
        let handle = tokio::spawn(async move {
            match cache.fetch_with_priority(&target, priority).await {
                Ok(data) => debug!(url = %target, bytes = data.len(), "Preloaded"),
                Err(e) => debug!(url = %target, error = %e, "Preload failed"),
            }
        });
        preloads.insert(url.to_string(), handle);
        debug!(url = %url, ?priority, "Preload scheduled");
    }

    /// Abort every in-flight preload
    pub async fn cancel_preloads(&self) {
        let mut preloads = self.preloads.lock().await;
        for (_, handle) in preloads.drain() {
            handle.abort();
        }
    }

    /// Number of preloads still running
    pub async fn pending_preloads(&self) -> usize {
        let mut preloads = self.preloads.lock().await;
        preloads.retain(|_, handle| !handle.is_finished());
        preloads.len()
    }

    /// Remove every entry and payload
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.total_bytes = 0;
        if let Err(e) = self.blobs.clear().await {
            warn!(error = %e, "Failed to clear cache payloads");
        }
        self.persist(&state).await;
        info!("Cache cleared");
    }

    /// Current statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.config.max_size_bytes,
            max_entries: self.config.max_entries,
            ..state.stats.clone()
        }
    }

    /// Snapshot of the index, for diagnostics
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    async fn lookup(&self, url: &Url, allow_expired: bool) -> Option<(Bytes, CacheEntry)> {
        let mut state = self.state.lock().await;
        let key = url.as_str();
        let entry = state.entries.get(key)?.clone();

        if !allow_expired && entry.is_expired(Utc::now()) {
            return None;
        }

        match self.blobs.read(key).await {
            Ok(Some(data)) => {
                let seq = state.next_seq();
                if let Some(e) = state.entries.get_mut(key) {
                    e.last_accessed = Utc::now();
                    e.access_seq = seq;
                }
                state.dirty = true;
                if !allow_expired {
                    state.stats.hits += 1;
                }
                Some((data, entry))
            }
            Ok(None) => {
                warn!(url = %url, "Cache payload missing, dropping entry");
                state.remove(key);
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Cache payload read failed");
                None
            }
        }
    }

    async fn spawn_revalidation(self: &Arc<Self>, url: Url, etag: Option<String>) {
        if !self.revalidating.lock().await.insert(url.to_string()) {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.state.lock().await.stats.revalidations += 1;
            match cache.fetcher.fetch(&url, etag.as_deref(), FetchPriority::Low).await {
                Ok(FetchResponse::Fresh {
                    body,
                    etag,
                    content_type,
                    max_age,
                }) => {
                    let meta = ResponseMeta {
                        etag,
                        content_type,
                        max_age,
                    };
                    if let Err(e) = cache.put(&url, body, meta).await {
                        debug!(url = %url, error = %e, "Revalidated response not cached");
                    }
                }
                Ok(FetchResponse::NotModified { max_age }) => {
                    cache.refresh_expiry(&url, max_age).await;
                }
                Err(e) => debug!(url = %url, error = %e, "Revalidation failed"),
            }
            cache.revalidating.lock().await.remove(url.as_str());
        });
    }

    async fn refresh_expiry(&self, url: &Url, max_age: Option<Duration>) {
        let mut state = self.state.lock().await;
        let ttl = max_age.unwrap_or_else(|| self.config.default_ttl());
        if let Some(entry) = state.entries.get_mut(url.as_str()) {
            entry.expires_at = expiry(Utc::now(), ttl);
            state.dirty = true;
        }
    }

    fn over_limits(&self, state: &CacheState) -> bool {
        state.total_bytes > self.config.max_size_bytes
            || state.entries.len() > self.config.max_entries
    }

    async fn evict_locked(&self, state: &mut CacheState) -> usize {
        if !self.over_limits(state) {
            return 0;
        }

        let victims: Vec<String> = {
            let mut ranked: Vec<&CacheEntry> = state.entries.values().collect();
            self.strategy.rank(&mut ranked);

            let mut bytes = state.total_bytes;
            let mut count = state.entries.len();
            let mut victims = Vec::new();
            for entry in ranked {
                if bytes <= self.config.max_size_bytes && count <= self.config.max_entries {
                    break;
                }
                bytes -= entry.size_bytes;
                count -= 1;
                victims.push(entry.key.clone());
            }
            victims
        };

        for key in &victims {
            state.remove(key);
            self.delete_blob(key).await;
            debug!(key = %key, policy = self.strategy.name(), "Evicted");
        }
        state.stats.evictions += victims.len() as u64;

        if !victims.is_empty() {
            info!(
                evicted = victims.len(),
                total_bytes = state.total_bytes,
                entries = state.entries.len(),
                "Cache limits enforced"
            );
        }
        victims.len()
    }

    async fn delete_blob(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete cache payload");
        }
    }

    async fn persist(&self, state: &CacheState) {
        let entries: Vec<&CacheEntry> = state.entries.values().collect();
        if let Err(e) = save_json(self.index_store.as_ref(), &self.index_key(), &entries).await {
            error!(error = %e, "Failed to persist cache index");
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Milliseconds until an entry expires, negative once expired
pub fn time_to_live(entry: &CacheEntry, now: DateTime<Utc>) -> i64 {
    (entry.expires_at - now).num_milliseconds()
}
