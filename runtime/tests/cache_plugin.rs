//! Integration tests for caching, stale-while-revalidate and request deduplication
//!
//! Engines sharing one environment and cache key behave as one logical query: fresh
//! entries short-circuit, stale entries are shown while revalidating, concurrent runs
//! share a request and successes reach every engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_request_runtime::{
    CacheEntry, CacheKey, ConfigLayer, Engine, Lifetime, RequestEnvironment, RequestOptions,
};
use composable_request_testing::{test_environment, MockService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn cached(env: &RequestEnvironment, stale_time: Lifetime) -> RequestOptions<u32, String> {
    RequestOptions::new(1)
        .with_config(
            ConfigLayer::new()
                .with_manual(true)
                .with_stale_time(stale_time),
        )
        .with_cache_key(CacheKey::Fixed("user".to_string()))
        .with_environment(env.clone())
}

fn versioned() -> MockService<u32, String> {
    MockService::from_fn(|_, call| Ok(format!("v{call}")))
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_answers_without_calling_service() {
    let env = test_environment();
    let service = versioned();
    let first = Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();
    let second =
        Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();

    assert_eq!(first.run_async(1).await.unwrap().as_deref(), Some("v0"));
    assert_eq!(second.run_async(1).await.unwrap().as_deref(), Some("v0"));

    assert_eq!(service.call_count(), 1);
    assert_eq!(second.data().as_deref(), Some("v0"));
    assert!(!second.loading());
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_is_shown_while_revalidating() {
    let env = test_environment();
    let service = versioned().with_delay(Duration::from_millis(100));
    let stale_after = Lifetime::Finite(Duration::from_secs(1));
    let first = Engine::from_service(service.service(), cached(&env, stale_after)).unwrap();
    first.run_async(1).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let second = Engine::from_service(service.service(), cached(&env, stale_after)).unwrap();
    let run = second.run_async(1);

    assert_eq!(second.data().as_deref(), Some("v0"));
    assert!(second.loading());
    assert_eq!(run.await.unwrap().as_deref(), Some("v1"));
    assert_eq!(service.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_stale_time_always_revalidates() {
    let env = test_environment();
    let service = versioned();
    let engine = Engine::from_service(
        service.service(),
        cached(&env, Lifetime::Finite(Duration::ZERO)),
    )
    .unwrap();

    engine.run_async(1).await.unwrap();
    engine.run_async(1).await.unwrap();

    assert_eq!(service.call_count(), 2);
    assert_eq!(engine.data().as_deref(), Some("v1"));
}

// ============================================================================
// Sharing between engines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_new_engine_is_seeded_from_cache() {
    let env = test_environment();
    let service = versioned();
    let first = Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();
    first.run_async(4).await.unwrap();

    let late = Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();

    assert_eq!(late.data().as_deref(), Some("v0"));
    assert_eq!(late.params(), Some(4));
}

#[tokio::test(start_paused = true)]
async fn test_success_reaches_engines_sharing_the_key() {
    let env = test_environment();
    let service = versioned();
    let stale = Lifetime::Finite(Duration::ZERO);
    let first = Engine::from_service(service.service(), cached(&env, stale)).unwrap();
    let second = Engine::from_service(service.service(), cached(&env, stale)).unwrap();

    first.run_async(1).await.unwrap();
    assert_eq!(second.data().as_deref(), Some("v0"));

    second.run_async(1).await.unwrap();
    assert_eq!(first.data().as_deref(), Some("v1"));
}

#[tokio::test(start_paused = true)]
async fn test_mutate_writes_through_to_other_engines() {
    let env = test_environment();
    let service = versioned();
    let first = Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();
    let second =
        Engine::from_service(service.service(), cached(&env, Lifetime::Infinite)).unwrap();

    first.mutate("local".to_string());

    assert_eq!(second.data().as_deref(), Some("local"));
    assert_eq!(second.run_async(1).await.unwrap().as_deref(), Some("local"));
    assert_eq!(service.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_share_one_request() {
    let env = test_environment();
    let service = versioned().with_delay(Duration::from_millis(100));
    let stale = Lifetime::Finite(Duration::ZERO);
    let first = Engine::from_service(service.service(), cached(&env, stale)).unwrap();
    let second = Engine::from_service(service.service(), cached(&env, stale)).unwrap();

    let (a, b) = futures::join!(first.run_async(1), second.run_async(1));

    assert_eq!(service.call_count(), 1);
    assert_eq!(a.unwrap().as_deref(), Some("v0"));
    assert_eq!(b.unwrap().as_deref(), Some("v0"));
    assert!(env.in_flight.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disposed_engine_stops_following_the_key() {
    let env = test_environment();
    let service = versioned();
    let stale = Lifetime::Finite(Duration::ZERO);
    let first = Engine::from_service(service.service(), cached(&env, stale)).unwrap();
    let second = Engine::from_service(service.service(), cached(&env, stale)).unwrap();

    second.dispose();
    first.run_async(1).await.unwrap();

    assert_eq!(second.data(), None);
    assert_eq!(env.values.listener_count("user"), 1);
}

// ============================================================================
// Expiry and custom stores
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cache_time_expires_from_last_write() {
    let env = test_environment();
    let ten_seconds = Lifetime::Finite(Duration::from_secs(10));

    env.values.set("k", 1u32, ten_seconds);
    tokio::time::sleep(Duration::from_secs(5)).await;
    env.values.set("k", 2u32, ten_seconds);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(env.values.get::<u32>("k"), Some(2));

    tokio::time::sleep(Duration::from_millis(5001)).await;
    assert!(!env.values.contains("k"));
}

#[tokio::test(start_paused = true)]
async fn test_custom_store_replaces_shared_cache() {
    let store: Arc<Mutex<HashMap<String, CacheEntry<String, u32>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let (reader, writer) = (Arc::clone(&store), Arc::clone(&store));
    let env = test_environment();
    let service = versioned();
    let options = || {
        let (reader, writer) = (Arc::clone(&reader), Arc::clone(&writer));
        cached(&env, Lifetime::Infinite).with_cache_store(
            Arc::new(move |key: &str| reader.lock().unwrap().get(key).cloned()),
            Arc::new(move |key: &str, entry: &CacheEntry<String, u32>| {
                writer.lock().unwrap().insert(key.to_string(), entry.clone());
            }),
        )
    };

    let first = Engine::from_service(service.service(), options()).unwrap();
    first.run_async(3).await.unwrap();

    assert!(!env.values.contains("user"));
    assert_eq!(store.lock().unwrap()["user"].params, 3);

    let second = Engine::from_service(service.service(), options()).unwrap();
    assert_eq!(second.run_async(3).await.unwrap().as_deref(), Some("v0"));
    assert_eq!(service.call_count(), 1);
}

#[tokio::test]
async fn test_half_custom_store_is_rejected() {
    let mut options = cached(&test_environment(), Lifetime::Infinite);
    options.get_cache = Some(Arc::new(|_: &str| None));

    let result = Engine::from_service(versioned().service(), options);

    assert!(result.is_err());
}
