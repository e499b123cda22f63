//! Response cache integration tests
//!
//! Hit/miss flow through the orchestrator, TTL expiry, namespaces,
//! warming limits and behavior while the cache store is down.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::*;
use gateway_core::Operation;
use gateway_orchestrator::{GatewayOrchestrator, HealthStatus};
use gateway_resilience::{CacheKey, ResponseCache, ResponseCacheConfig, WarmEntry};
use std::sync::Arc;
use std::time::Duration;

fn warm_entries(operation: Operation, n: usize) -> Vec<WarmEntry> {
    (0..n)
        .map(|i| WarmEntry {
            key: CacheKey::for_request(operation, "claude-3-5-haiku", &prompt(i)),
            value: format!("precomputed #{i}"),
            ttl: Duration::from_secs(3600),
        })
        .collect()
}

/// The second identical request is served from the cache
#[tokio::test]
async fn test_repeat_request_hits_cache() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = free_user(1);

    let first = gateway.execute(Operation::Analysis, &user, "describe the repo").await;
    let second = gateway.execute(Operation::Analysis, &user, "describe the repo").await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.result, second.result);
    assert_eq!(second.attempts, 0);
    assert_eq!(backend.calls(), 1);

    let stats = gateway.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

/// Entries expire with the operation's TTL
#[tokio::test]
async fn test_cached_response_expires() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = premium_user(1);
    let ttl = gateway.profile(Operation::Chat).cache_ttl;

    gateway.execute(Operation::Chat, &user, "hello").await;
    clock.advance(ttl - Duration::from_secs(1));
    assert!(gateway.execute(Operation::Chat, &user, "hello").await.cache_hit);

    clock.advance(Duration::from_secs(2));
    let refreshed = gateway.execute(Operation::Chat, &user, "hello").await;
    assert!(!refreshed.cache_hit);
    assert_eq!(backend.calls(), 2);
}

/// Direct set/get round trip honors TTL
#[tokio::test]
async fn test_cache_round_trip_and_expiry() {
    let clock = manual_clock();
    let cache = ResponseCache::new(ResponseCacheConfig::default(), Arc::new(clock.clone()));
    let key = CacheKey::for_request(Operation::Suggestions, "claude-3-5-haiku", "next steps");

    cache.set(&key, "ship it", Some(Duration::from_secs(60))).await;
    assert_eq!(cache.get(&key).await.as_deref(), Some("ship it"));

    clock.advance(Duration::from_secs(61));
    assert_eq!(cache.get(&key).await, None);
}

/// Clearing one namespace leaves the others intact
#[tokio::test]
async fn test_clear_operation_namespace() {
    let clock = manual_clock();
    let cache = ResponseCache::new(ResponseCacheConfig::default(), Arc::new(clock));
    cache.warm(warm_entries(Operation::Chat, 5)).await;
    cache.warm(warm_entries(Operation::Analysis, 3)).await;

    assert_eq!(cache.clear_operation(Operation::Chat).await, 5);
    assert_eq!(cache.len().await, Some(3));
    assert_eq!(cache.clear_operation(Operation::Chat).await, 0);
}

/// Warming fills at most 30% of the free slots
#[tokio::test]
async fn test_warming_respects_free_space_fraction() {
    let clock = manual_clock();
    let config = ResponseCacheConfig {
        max_entries: 100,
        ..ResponseCacheConfig::default()
    };
    let cache = ResponseCache::new(config, Arc::new(clock));

    assert_eq!(cache.warm(warm_entries(Operation::Analysis, 100)).await, 30);
    assert_eq!(cache.len().await, Some(30));

    // 70 free slots left, 21 of them may be warmed
    assert_eq!(cache.warm(warm_entries(Operation::Chat, 100)).await, 21);
    assert_eq!(cache.len().await, Some(51));
    assert_eq!(cache.stats().warmed, 51);
}

/// Warming skips keys that are already cached
#[tokio::test]
async fn test_warming_skips_existing_keys() {
    let clock = manual_clock();
    let cache = ResponseCache::new(ResponseCacheConfig::default(), Arc::new(clock));
    let existing = CacheKey::for_request(Operation::Analysis, "claude-3-5-haiku", &prompt(0));
    cache.set(&existing, "fresh answer", None).await;

    assert_eq!(cache.warm(warm_entries(Operation::Analysis, 4)).await, 3);
    assert_eq!(cache.get(&existing).await.as_deref(), Some("fresh answer"));
}

/// Warmed prompts are served without a backend call
#[tokio::test]
async fn test_warmed_prompt_served_by_orchestrator() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);

    let warmed = gateway
        .warm_cache(
            sample_prompts()
                .into_iter()
                .map(|(op, p)| (op, p.to_string(), format!("warm: {p}"))),
        )
        .await;
    assert_eq!(warmed, 4);

    for (operation, p) in sample_prompts() {
        let response = gateway.execute(operation, &free_user(1), p).await;
        assert!(response.cache_hit);
        assert_eq!(response.result, Some(format!("warm: {p}")));
    }
    assert_eq!(backend.calls(), 0);
}

/// An unreachable cache degrades to misses, requests still succeed
#[tokio::test]
async fn test_cache_outage_degrades_to_miss() {
    init_tracing();
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = GatewayOrchestrator::builder()
        .config(test_config())
        .backend(backend.clone())
        .clock(Arc::new(clock.clone()))
        .cache_backend(Arc::new(UnreachableCache))
        .build()
        .expect("valid configuration");
    let user = free_user(1);

    let first = gateway.execute(Operation::Chat, &user, "hello").await;
    let second = gateway.execute(Operation::Chat, &user, "hello").await;

    assert!(first.is_success() && second.is_success());
    assert!(!second.cache_hit);
    assert_eq!(backend.calls(), 2);
    assert!(gateway.cache().stats().errors >= 2);

    let health = gateway.health().await;
    assert!(!health.cache_healthy);
    assert_eq!(health.status, HealthStatus::Degraded);
}
