//! Response caching with TTL and per-operation namespaces.
//!
//! Keys are `"<operation>:<sha256-hex>"`, so clearing one namespace never
//! touches another. Entries are stored through a [`CacheBackend`] as
//! serialized [`CacheEntry`] records. Backend failures degrade to a miss or a
//! no-op; `get` never fails.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::{Clock, Operation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Error types for cache backend operations
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Backend not reachable
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Stored record could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store behind the response cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value with TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete a key, returning whether it existed
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// List live keys starting with `prefix`
    async fn scan_by_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Check that the backend is reachable
    async fn ping(&self) -> CacheResult<()>;

    /// Number of live entries
    async fn len(&self) -> CacheResult<usize>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Cache key for an operation request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a request: operation namespace plus a SHA-256 of
    /// model and prompt
    #[must_use]
    pub fn for_request(operation: Operation, model: &str, prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!("{}{digest}", operation.cache_prefix()))
    }

    /// Wrap an existing key string
    #[must_use]
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cached record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Cached response content
    pub value: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// TTL in milliseconds
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// Create a new entry
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            created_at,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// When the entry stops being served
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::milliseconds(self.ttl_ms as i64)
    }

    /// Check if the entry is expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// Local cache entry with clock-based expiry
#[derive(Debug)]
struct LocalCacheEntry {
    data: Vec<u8>,
    expires_at: DateTime<Utc>,
    hits: u64,
}

impl LocalCacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Bounded in-memory cache backend.
///
/// When full, expired entries are dropped first, then the entries with the
/// fewest hits.
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, LocalCacheEntry>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheBackend {
    /// Create a new memory cache backend
    #[must_use]
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, LocalCacheEntry>, incoming: &str) {
        if entries.contains_key(incoming) || entries.len() < self.max_entries {
            return;
        }

        let now = self.clock.now();
        entries.retain(|_, entry| !entry.is_expired(now));

        if entries.len() >= self.max_entries {
            let to_remove = entries.len() - self.max_entries + 1;
            let mut hit_counts: Vec<(String, u64)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.hits))
                .collect();
            hit_counts.sort_by_key(|(_, hits)| *hits);

            for (key, _) in hit_counts.into_iter().take(to_remove) {
                debug!(key = %key, "Evicting cache entry");
                entries.remove(&key);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key) {
            if entry.is_expired(now) {
                entries.remove(key);
                return Ok(None);
            }
            entry.hits += 1;
            return Ok(Some(entry.data.clone()));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let expires_at = self.clock.now()
            + ChronoDuration::from_std(ttl).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut entries = self.entries.write().await;
        self.evict_if_needed(&mut entries, key);
        entries.insert(
            key.to_string(),
            LocalCacheEntry {
                data: value,
                expires_at,
                hits: 0,
            },
        );

        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_by_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !v.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn len(&self) -> CacheResult<usize> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Response cache configuration
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Maximum entries the store may hold
    pub max_entries: usize,
    /// TTL used when the caller does not give one
    pub default_ttl: Duration,
    /// Share of free slots warming may fill
    pub warm_fraction: f64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            warm_fraction: 0.3,
        }
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Backend or decode errors
    pub errors: u64,
    /// Entries written
    pub writes: u64,
    /// Entries inserted by warming
    pub warmed: u64,
}

impl CacheStats {
    /// Hit rate in the range 0.0 - 1.0
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Precomputed entry offered to [`ResponseCache::warm`]
#[derive(Debug, Clone)]
pub struct WarmEntry {
    /// Cache key
    pub key: CacheKey,
    /// Value to cache
    pub value: String,
    /// TTL for the entry
    pub ttl: Duration,
}

/// Response cache over a pluggable backend
pub struct ResponseCache {
    config: ResponseCacheConfig,
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    warmed: AtomicU64,
}

impl ResponseCache {
    /// Create a cache over an in-memory backend sized from the config
    #[must_use]
    pub fn new(config: ResponseCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let backend = Arc::new(MemoryCacheBackend::new(config.max_entries, Arc::clone(&clock)));
        Self::with_backend(config, backend, clock)
    }

    /// Create a cache over a custom backend
    #[must_use]
    pub fn with_backend(
        config: ResponseCacheConfig,
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            backend,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            warmed: AtomicU64::new(0),
        }
    }

    /// Check if caching is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    fn record_error(&self, op: &'static str, key: &str, error: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.name(),
            op,
            key = %key,
            error = %error,
            "Cache backend error, treating as miss"
        );
    }

    /// Look up a cached value
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let found = match self.backend.get(key.as_str()).await {
            Ok(Some(data)) => match serde_json::from_slice::<CacheEntry>(&data) {
                Ok(entry) if !entry.is_expired(self.clock.now()) => Some(entry.value),
                Ok(_) => {
                    // Backend kept it past its TTL
                    if let Err(e) = self.backend.del(key.as_str()).await {
                        self.record_error("del", key.as_str(), &e);
                    }
                    None
                }
                Err(e) => {
                    self.record_error("decode", key.as_str(), &CacheError::Serialization(e.to_string()));
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.record_error("get", key.as_str(), &e);
                None
            }
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
        }
        found
    }

    /// Store a value; `None` uses the default TTL
    pub async fn set(&self, key: &CacheKey, value: &str, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if self.write(key, value, ttl).await {
            debug!(key = %key, ttl_secs = ttl.as_secs(), "Response cached");
        }
    }

    async fn write(&self, key: &CacheKey, value: &str, ttl: Duration) -> bool {
        let entry = CacheEntry::new(key.as_str(), value, self.clock.now(), ttl);
        let data = match serde_json::to_vec(&entry) {
            Ok(d) => d,
            Err(e) => {
                self.record_error("encode", key.as_str(), &CacheError::Serialization(e.to_string()));
                return false;
            }
        };

        match self.backend.set(key.as_str(), data, ttl).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.record_error("set", key.as_str(), &e);
                false
            }
        }
    }

    /// Delete a key
    pub async fn del(&self, key: &CacheKey) -> bool {
        match self.backend.del(key.as_str()).await {
            Ok(existed) => existed,
            Err(e) => {
                self.record_error("del", key.as_str(), &e);
                false
            }
        }
    }

    /// Delete every entry whose key starts with `prefix`, returning the count
    pub async fn clear_by_prefix(&self, prefix: &str) -> usize {
        let keys = match self.backend.scan_by_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                self.record_error("scan", prefix, &e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.backend.del(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => self.record_error("del", &key, &e),
            }
        }

        info!(prefix = %prefix, removed, "Cache namespace cleared");
        removed
    }

    /// Clear the namespace of an operation class
    pub async fn clear_operation(&self, operation: Operation) -> usize {
        self.clear_by_prefix(operation.cache_prefix()).await
    }

    /// Check that the backend is reachable
    pub async fn health(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Cache health check failed");
                false
            }
        }
    }

    /// Pre-populate common entries.
    ///
    /// Inserts at most `warm_fraction` of the currently free slots, skips keys
    /// that are already cached and never evicts. Returns the number inserted.
    pub async fn warm(&self, entries: Vec<WarmEntry>) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let used = match self.backend.len().await {
            Ok(n) => n,
            Err(e) => {
                self.record_error("len", "*", &e);
                return 0;
            }
        };
        let free = self.config.max_entries.saturating_sub(used);
        let budget = (free as f64 * self.config.warm_fraction.clamp(0.0, 1.0)).floor() as usize;

        let mut inserted = 0;
        for entry in entries {
            if inserted >= budget {
                break;
            }
            match self.backend.get(entry.key.as_str()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    self.record_error("get", entry.key.as_str(), &e);
                    break;
                }
            }
            if !self.write(&entry.key, &entry.value, entry.ttl).await {
                break;
            }
            inserted += 1;
        }

        self.warmed.fetch_add(inserted as u64, Ordering::Relaxed);
        info!(inserted, budget, free, "Cache warmed");
        inserted
    }

    /// Number of live entries, if the backend can tell
    pub async fn len(&self) -> Option<usize> {
        self.backend.len().await.ok()
    }

    /// Get counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            warmed: self.warmed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .field("stats", &self.stats())
            .finish()
    }
}
