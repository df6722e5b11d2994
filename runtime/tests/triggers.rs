//! Integration tests for run triggers and gates
//!
//! The ready gate, refresh dependencies and focus/visibility refreshes, driven through a
//! test environment's listener registry and watch channels.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_request_runtime::{
    watch_dep, ConfigLayer, Engine, EventClass, Ready, RequestOptions,
};
use composable_request_testing::{test_environment, MockService};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// Test Fixtures
// ============================================================================

fn counting() -> MockService<u32, u32> {
    MockService::from_fn(|n: &u32, _| Ok(*n))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Ready gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_predicate_gate_halts_runs() {
    let open = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&open);
    let service = counting();
    let options = RequestOptions::new(0)
        .with_config(ConfigLayer::new().with_manual(true))
        .with_ready(Ready::Predicate(Arc::new(move || gate.load(Ordering::SeqCst))))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();

    assert_eq!(engine.run_async(1).await.unwrap(), None);
    assert!(!engine.loading());
    assert_eq!(service.call_count(), 0);

    open.store(true, Ordering::SeqCst);
    assert_eq!(engine.run_async(2).await.unwrap(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_predicate_gate_drops_blocked_initial_run() {
    let open = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&open);
    let service = counting();
    let options = RequestOptions::new(7)
        .with_ready(Ready::Predicate(Arc::new(move || gate.load(Ordering::SeqCst))))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();

    settle().await;
    open.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(service.call_count(), 0);
    assert_eq!(engine.data(), None);

    assert_eq!(engine.refresh_async().await.unwrap(), Some(7));
    assert_eq!(service.calls(), vec![7]);
}

#[tokio::test(start_paused = true)]
async fn test_signal_gate_defers_initial_run() {
    let (tx, rx) = watch::channel(false);
    let service = counting();
    let options = RequestOptions::new(7)
        .with_ready(Ready::Signal(rx))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();

    settle().await;
    assert_eq!(service.call_count(), 0);

    tx.send(true).unwrap();
    settle().await;
    assert_eq!(service.calls(), vec![7]);
    assert_eq!(engine.data(), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_signal_gate_replays_last_blocked_params() {
    let (tx, rx) = watch::channel(false);
    let service = counting();
    let options = RequestOptions::new(0)
        .with_ready(Ready::Signal(rx))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();

    engine.run(3);
    engine.run(4);
    tx.send(true).unwrap();
    settle().await;
    assert_eq!(service.calls(), vec![4]);

    tx.send(false).unwrap();
    settle().await;
    tx.send(true).unwrap();
    settle().await;
    assert_eq!(service.calls(), vec![4, 0]);
    assert!(!engine.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_signal_gate_does_not_auto_run_manual_engine() {
    let (tx, rx) = watch::channel(false);
    let service = counting();
    let options = RequestOptions::new(0)
        .with_config(ConfigLayer::new().with_manual(true))
        .with_ready(Ready::Signal(rx))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();

    tx.send(true).unwrap();
    settle().await;
    assert_eq!(service.call_count(), 0);

    assert_eq!(engine.run_async(5).await.unwrap(), Some(5));
}

// ============================================================================
// Refresh dependencies
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dependency_change_refreshes() {
    let (tx, rx) = watch::channel(0u32);
    let service = counting();
    let options = RequestOptions::new(1)
        .with_refresh_dep(watch_dep(rx))
        .with_environment(test_environment());
    let engine = Engine::from_service(service.service(), options).unwrap();
    settle().await;
    engine.run_async(9).await.unwrap();

    tx.send(1).unwrap();
    settle().await;

    assert_eq!(service.calls(), vec![1, 9, 9]);
}

#[tokio::test(start_paused = true)]
async fn test_dependency_action_replaces_refresh() {
    let (tx, rx) = watch::channel("a");
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let service = counting();
    let options = RequestOptions::new(0)
        .with_config(ConfigLayer::new().with_manual(true))
        .with_refresh_dep(watch_dep(rx))
        .with_refresh_deps_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .with_environment(test_environment());
    let _engine = Engine::from_service(service.service(), options).unwrap();

    tx.send("b").unwrap();
    settle().await;
    tx.send("c").unwrap();
    settle().await;

    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(service.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_engine_ignores_dependency_without_action() {
    let (tx, rx) = watch::channel(0u32);
    let service = counting();
    let options = RequestOptions::new(0)
        .with_config(ConfigLayer::new().with_manual(true))
        .with_refresh_dep(watch_dep(rx))
        .with_environment(test_environment());
    let _engine = Engine::from_service(service.service(), options).unwrap();

    tx.send(1).unwrap();
    settle().await;

    assert_eq!(service.call_count(), 0);
}

// ============================================================================
// Focus and visibility
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_focus_refresh_is_rate_limited() {
    let env = test_environment();
    let service = counting();
    let options = RequestOptions::new(0)
        .with_config(
            ConfigLayer::new()
                .with_manual(true)
                .with_refresh_on_window_focus(true)
                .with_refocus_timespan(Duration::from_secs(5)),
        )
        .with_environment(env.clone());
    let engine = Engine::from_service(service.service(), options).unwrap();
    engine.run_async(2).await.unwrap();

    env.listeners.notify_focus();
    env.listeners.notify_focus();
    assert_eq!(service.calls(), vec![2, 2]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    env.listeners.set_visibility(false);
    env.listeners.set_visibility(true);
    assert_eq!(service.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_unsubscribes_host_listeners() {
    let env = test_environment();
    let options = RequestOptions::new(0)
        .with_config(
            ConfigLayer::new()
                .with_manual(true)
                .with_refresh_on_window_focus(true)
                .with_polling_interval(Duration::from_secs(1)),
        )
        .with_environment(env.clone());
    let engine = Engine::from_service(counting().service(), options).unwrap();

    assert_eq!(env.listeners.len(EventClass::Focus), 1);
    assert_eq!(env.listeners.len(EventClass::Visible), 2);
    assert_eq!(env.listeners.len(EventClass::Reconnect), 1);

    engine.dispose();

    assert_eq!(env.listeners.len(EventClass::Focus), 0);
    assert_eq!(env.listeners.len(EventClass::Visible), 0);
    assert_eq!(env.listeners.len(EventClass::Reconnect), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_engine_releases_listeners() {
    let env = test_environment();
    let options = RequestOptions::new(0)
        .with_config(
            ConfigLayer::new()
                .with_manual(true)
                .with_refresh_on_window_focus(true),
        )
        .with_environment(env.clone());
    let engine = Engine::from_service(counting().service(), options).unwrap();
    assert_eq!(env.listeners.len(EventClass::Focus), 1);

    drop(engine);

    assert_eq!(env.listeners.len(EventClass::Focus), 0);
}
