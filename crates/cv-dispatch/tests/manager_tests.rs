//! Manager Tests
//!
//! Tests for:
//! - Single-shot runs
//! - Shutdown via an injected signal, with drain and timeout
//! - Fatal errors versus cancellation

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockProvider;
use cv_dispatch::{
    handler_fn, DispatchError, DispatcherConfig, HandlerError, Manager, ManagerError, Route,
};

fn route(provider: &Arc<MockProvider>, handler_delay_ms: u64) -> Route {
    Route::builder()
        .provider(provider.clone())
        .handler(handler_fn(move |_, _| async move {
            tokio::time::sleep(Duration::from_millis(handler_delay_ms)).await;
            Ok::<_, HandlerError>(true)
        }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_single_shot_run_completes_without_signal() {
    let provider = Arc::new(MockProvider::new("orders").with_batch(&["m1", "m2"]));
    let manager = Manager::new(vec![route(&provider, 0)], DispatcherConfig::default()).unwrap();

    manager
        .run_until(false, std::future::pending::<()>())
        .await
        .unwrap();

    let mut confirmed = provider.confirmed();
    confirmed.sort();
    assert_eq!(confirmed, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_shutdown_signal_drains_and_stops() {
    let provider = Arc::new(MockProvider::new("orders").with_batch(&["m1", "m2", "m3"]));
    let manager = Manager::new(vec![route(&provider, 30)], DispatcherConfig::default()).unwrap();

    let shutdown = tokio::time::sleep(Duration::from_millis(10));
    tokio::time::timeout(Duration::from_secs(5), manager.run_until(true, shutdown))
        .await
        .expect("manager should stop after the signal")
        .unwrap();

    assert!(manager.dispatcher().cancellation_token().is_cancelled());
    let mut confirmed = provider.confirmed();
    confirmed.sort();
    assert_eq!(confirmed, vec!["m1", "m2", "m3"]);
    assert_eq!(provider.events(), vec!["start:orders", "stop:orders"]);
}

#[tokio::test]
async fn test_shutdown_timeout() {
    let provider = Arc::new(MockProvider::new("orders").with_batch(&["slow"]));
    let manager = Manager::new(vec![route(&provider, 5_000)], DispatcherConfig::default())
        .unwrap()
        .with_shutdown_timeout(Duration::from_millis(50));

    let shutdown = tokio::time::sleep(Duration::from_millis(10));
    let result = manager.run_until(true, shutdown).await;

    assert!(matches!(result, Err(ManagerError::ShutdownTimeout(t)) if t == Duration::from_millis(50)));
    assert!(provider.confirmed().is_empty());
    assert!(provider.released().is_empty());
    // The abandoned run still releases the route scope
    assert_eq!(provider.events(), vec!["start:orders", "stop:orders"]);
}

#[tokio::test]
async fn test_fatal_error_is_reported() {
    let provider = Arc::new(MockProvider::new("orders").failing_fetch_on_call(1));
    let manager = Manager::new(vec![route(&provider, 0)], DispatcherConfig::default()).unwrap();

    let result = manager.run_until(true, std::future::pending::<()>()).await;

    assert!(matches!(
        result,
        Err(ManagerError::Dispatch(DispatchError::Fetch { .. }))
    ));
}

#[tokio::test]
async fn test_cancelled_handler_is_a_clean_stop() {
    let provider = Arc::new(MockProvider::new("orders").with_batch(&["m1"]));
    let route = Route::builder()
        .provider(provider.clone())
        .handler(handler_fn(|_, _| async { Err::<bool, _>(HandlerError::Cancelled) }))
        .build()
        .unwrap();
    let manager = Manager::new(vec![route], DispatcherConfig::default()).unwrap();

    manager
        .run_until(false, std::future::pending::<()>())
        .await
        .unwrap();

    assert!(provider.confirmed().is_empty());
    assert!(provider.released().is_empty());
}

#[tokio::test]
async fn test_stop_before_forever_run() {
    let provider = Arc::new(MockProvider::new("orders").with_batch(&["m1"]));
    let manager = Manager::new(vec![route(&provider, 0)], DispatcherConfig::default()).unwrap();

    manager.stop();
    manager
        .run_until(true, std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(provider.fetch_calls(), 0);
}
