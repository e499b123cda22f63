//! Per-identity admission control.
//!
//! Free identities get `limit` requests per window; premium identities are
//! never limited. Window state lives behind a [`RateLimitStore`] so it can be
//! moved out of process. When the store fails the limiter fails open.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use gateway_core::{Clock, Identity};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Windowing algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Counter reset at `window_start + window`, where the window is anchored at
    /// the first request after the previous window ended
    #[default]
    FixedWindow,
    /// Request log covering the trailing window
    SlidingWindow,
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Whether free identities are limited at all
    pub enabled: bool,
    /// Requests allowed per window
    pub limit: u32,
    /// Window duration
    pub window: Duration,
    /// Windowing algorithm
    pub algorithm: RateLimitAlgorithm,
    /// State untouched for this long is removed by [`RateLimiter::prune_idle`]
    pub idle_ttl: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 20,
            window: Duration::from_secs(3600),
            algorithm: RateLimitAlgorithm::FixedWindow,
            idle_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted
    Allowed {
        /// Requests left in the window; `None` when unbounded
        remaining: Option<u32>,
        /// When the window resets; `None` when unbounded
        reset_at: Option<DateTime<Utc>>,
    },
    /// Request rejected
    Denied {
        /// Milliseconds until a slot frees up
        retry_after_ms: u64,
    },
}

impl RateLimitDecision {
    fn unbounded() -> Self {
        Self::Allowed {
            remaining: None,
            reset_at: None,
        }
    }

    /// Check if the request was admitted
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Window state of one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Identity the state belongs to
    pub identity_id: String,
    /// Start of the current window
    pub window_start: DateTime<Utc>,
    /// Requests admitted in the current window
    pub count: u32,
    /// Requests allowed per window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_duration_ms: u64,
}

impl RateLimitState {
    /// When the counter resets
    #[must_use]
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.window_start + ChronoDuration::milliseconds(self.window_duration_ms as i64)
    }
}

/// Rate limit store errors
#[derive(Debug, Clone, Error)]
pub enum RateLimitStoreError {
    /// Store could not be reached
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Parameters of a single admission check
#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    /// Requests allowed per window
    pub limit: u32,
    /// Window duration
    pub window: Duration,
    /// Windowing algorithm
    pub algorithm: RateLimitAlgorithm,
}

/// Storage for per-identity window state.
///
/// `check_and_consume` must be atomic per key: two concurrent calls for the
/// same key may never both take the last slot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Check the window for `key` at `now` and consume a slot if one is free
    async fn check_and_consume(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> Result<RateLimitDecision, RateLimitStoreError>;

    /// Current state for `key`
    async fn state(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> Result<Option<RateLimitState>, RateLimitStoreError>;

    /// Drop the state for `key`
    async fn reset(&self, key: &str) -> Result<bool, RateLimitStoreError>;

    /// Remove keys not seen since `cutoff`
    async fn prune_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, RateLimitStoreError>;

    /// Number of tracked keys
    async fn len(&self) -> Result<usize, RateLimitStoreError>;

    /// Store name for logs
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct WindowEntry {
    window_start: DateTime<Utc>,
    count: u32,
    log: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl WindowEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            log: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Roll the window forward so that it reflects `now`
    fn refresh(&mut self, now: DateTime<Utc>, params: WindowParams) {
        let window = to_chrono(params.window);
        match params.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                // The boundary instant belongs to the new window
                if now >= self.window_start + window {
                    self.window_start = now;
                    self.count = 0;
                }
            }
            RateLimitAlgorithm::SlidingWindow => {
                while self.log.front().is_some_and(|t| *t + window <= now) {
                    self.log.pop_front();
                }
                self.count = self.log.len() as u32;
                self.window_start = self.log.front().copied().unwrap_or(now);
            }
        }
    }

    fn consume(&mut self, now: DateTime<Utc>, params: WindowParams) -> RateLimitDecision {
        self.refresh(now, params);
        self.last_seen = now;

        let reset_at = self.window_start + to_chrono(params.window);
        if self.count < params.limit {
            self.count += 1;
            if params.algorithm == RateLimitAlgorithm::SlidingWindow {
                self.log.push_back(now);
            }
            RateLimitDecision::Allowed {
                remaining: Some(params.limit - self.count),
                reset_at: Some(reset_at),
            }
        } else {
            let retry_after_ms = (reset_at - now).num_milliseconds().max(1) as u64;
            RateLimitDecision::Denied { retry_after_ms }
        }
    }

    fn snapshot(&self, key: &str, params: WindowParams) -> RateLimitState {
        RateLimitState {
            identity_id: key.to_string(),
            window_start: self.window_start,
            count: self.count,
            limit: params.limit,
            window_duration_ms: params.window.as_millis() as u64,
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100))
}

/// In-process store keyed by identity
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, WindowEntry>,
}

impl MemoryRateLimitStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn consume_sync(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> RateLimitDecision {
        // The entry guard holds the shard lock for the whole check-and-increment
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry::new(now));
        entry.consume(now, params)
    }

    fn state_sync(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> Option<RateLimitState> {
        // Reads never move the stored window
        let mut view = self.entries.get(key)?.clone();
        view.refresh(now, params);
        Some(view.snapshot(key, params))
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_consume(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        Ok(self.consume_sync(key, now, params))
    }

    async fn state(
        &self,
        key: &str,
        now: DateTime<Utc>,
        params: WindowParams,
    ) -> Result<Option<RateLimitState>, RateLimitStoreError> {
        Ok(self.state_sync(key, now, params))
    }

    async fn reset(&self, key: &str) -> Result<bool, RateLimitStoreError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn prune_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, RateLimitStoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> Result<usize, RateLimitStoreError> {
        Ok(self.entries.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Rate limiter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    /// Free requests admitted
    pub allowed: u64,
    /// Free requests rejected
    pub denied: u64,
    /// Requests that skipped limiting (premium or limiter disabled)
    pub bypassed: u64,
    /// Requests admitted because the store failed
    pub degraded: u64,
}

/// Per-identity rate limiter
pub struct RateLimiter {
    config: RateLimiterConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    allowed: AtomicU64,
    denied: AtomicU64,
    bypassed: AtomicU64,
    degraded: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter backed by an in-memory store
    #[must_use]
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(config, Arc::new(MemoryRateLimitStore::new()), clock)
    }

    /// Create a limiter with a custom store
    #[must_use]
    pub fn with_store(
        config: RateLimiterConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn params(&self) -> WindowParams {
        WindowParams {
            limit: self.config.limit,
            window: self.config.window,
            algorithm: self.config.algorithm,
        }
    }

    /// Admit or reject a request from `identity`, consuming a slot on admission
    pub async fn check_and_consume(&self, identity: &Identity) -> RateLimitDecision {
        if identity.is_premium() || !self.config.enabled {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            return RateLimitDecision::unbounded();
        }

        let now = self.clock.now();
        match self
            .store
            .check_and_consume(&identity.id, now, self.params())
            .await
        {
            Ok(decision) => {
                if decision.is_allowed() {
                    self.allowed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.denied.fetch_add(1, Ordering::Relaxed);
                    debug!(identity = %identity.id, ?decision, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(
                    identity = %identity.id,
                    store = self.store.name(),
                    error = %e,
                    "Rate limit store unavailable, admitting request"
                );
                RateLimitDecision::unbounded()
            }
        }
    }

    /// Current window state of an identity, if tracked
    pub async fn state(&self, identity_id: &str) -> Option<RateLimitState> {
        let now = self.clock.now();
        match self.store.state(identity_id, now, self.params()).await {
            Ok(state) => state,
            Err(e) => {
                warn!(identity = %identity_id, error = %e, "Failed to read rate limit state");
                None
            }
        }
    }

    /// Clear the window of an identity
    pub async fn reset(&self, identity_id: &str) -> bool {
        self.store.reset(identity_id).await.unwrap_or_else(|e| {
            warn!(identity = %identity_id, error = %e, "Failed to reset rate limit state");
            false
        })
    }

    /// Drop state for identities idle longer than `idle_ttl`
    pub async fn prune_idle(&self) -> usize {
        let cutoff = self.clock.now() - to_chrono(self.config.idle_ttl);
        match self.store.prune_idle(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Pruned idle rate limit state");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Failed to prune rate limit state");
                0
            }
        }
    }

    /// Number of identities with window state
    pub async fn tracked_identities(&self) -> usize {
        self.store.len().await.unwrap_or(0)
    }

    /// Get counters
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("store", &self.store.name())
            .field("stats", &self.stats())
            .finish()
    }
}
