//! Mock AI backends and failing stores for integration testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::{AiBackend, BackendError, BackendRequest, BackendResponse};
use gateway_resilience::{
    CacheBackend, CacheError, CacheResult, RateLimitDecision, RateLimitState, RateLimitStore,
    RateLimitStoreError, WindowParams,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tokens billed per successful mock call
pub const MOCK_TOKENS: u32 = 125;

/// Backend that plays a script of results, then echoes the prompt
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<BackendResponse, BackendError>>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Backend that always succeeds
    pub fn healthy() -> Arc<Self> {
        Self::with_script(Vec::new())
    }

    /// Backend that plays `script` before echoing
    pub fn with_script(script: Vec<Result<BackendResponse, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Backend that fails `n` times with a 503 before echoing
    pub fn failing(n: usize) -> Arc<Self> {
        Self::with_script(
            (0..n)
                .map(|_| Err(BackendError::unavailable("service unavailable", Some(503))))
                .collect(),
        )
    }

    /// Queue another scripted result
    pub fn push(&self, result: Result<BackendResponse, BackendError>) {
        self.script.lock().push_back(result);
    }

    /// Number of calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl AiBackend for ScriptedBackend {
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(BackendResponse::new(
                format!("echo: {}", request.prompt),
                MOCK_TOKENS,
            ))
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Backend that answers only after a delay
pub struct SlowBackend {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowBackend {
    /// Create a backend answering after `delay`
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiBackend for SlowBackend {
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(BackendResponse::new(
            format!("slow: {}", request.prompt),
            MOCK_TOKENS,
        ))
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Cache store that is never reachable
#[derive(Debug, Default)]
pub struct UnreachableCache;

fn cache_down<T>() -> CacheResult<T> {
    Err(CacheError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl CacheBackend for UnreachableCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        cache_down()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        cache_down()
    }

    async fn del(&self, _key: &str) -> CacheResult<bool> {
        cache_down()
    }

    async fn scan_by_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
        cache_down()
    }

    async fn ping(&self) -> CacheResult<()> {
        cache_down()
    }

    async fn len(&self) -> CacheResult<usize> {
        cache_down()
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Rate limit store that is never reachable
#[derive(Debug, Default)]
pub struct UnreachableRateLimitStore;

fn store_down<T>() -> Result<T, RateLimitStoreError> {
    Err(RateLimitStoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl RateLimitStore for UnreachableRateLimitStore {
    async fn check_and_consume(
        &self,
        _key: &str,
        _now: DateTime<Utc>,
        _params: WindowParams,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        store_down()
    }

    async fn state(
        &self,
        _key: &str,
        _now: DateTime<Utc>,
        _params: WindowParams,
    ) -> Result<Option<RateLimitState>, RateLimitStoreError> {
        store_down()
    }

    async fn reset(&self, _key: &str) -> Result<bool, RateLimitStoreError> {
        store_down()
    }

    async fn prune_idle(&self, _cutoff: DateTime<Utc>) -> Result<usize, RateLimitStoreError> {
        store_down()
    }

    async fn len(&self) -> Result<usize, RateLimitStoreError> {
        store_down()
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}
