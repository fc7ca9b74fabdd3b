mod common;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use idempotency_gate::config::IdempotencySettings;
use idempotency_gate::idempotency::{
    IdempotencyRecord, IdempotencyStatus, IdempotencyStore, RedisIdempotencyStore,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::{body_string, build_app, redis_url, request, send};

fn store() -> RedisIdempotencyStore {
    RedisIdempotencyStore::open(&redis_url()).expect("Invalid REDIS_URL")
}

fn test_key() -> String {
    format!("idem-test:{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_claim_is_set_if_absent() {
    let store = store();
    let key = test_key();

    let first = store
        .claim(&key, &IdempotencyRecord::pending(), Duration::from_secs(30))
        .await
        .expect("Failed to claim");
    assert!(first, "Expected the first claim to win");

    let second = store
        .claim(&key, &IdempotencyRecord::pending(), Duration::from_secs(30))
        .await
        .expect("Failed to claim");
    assert!(!second, "Expected the second claim to lose");

    let found = store.get(&key).await.expect("Failed to get").unwrap();
    assert_eq!(found.state, IdempotencyStatus::Pending);

    store.delete(&key).await.expect("Failed to delete");
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_put_overwrites_pending_record() {
    let store = store();
    let key = test_key();

    store
        .claim(&key, &IdempotencyRecord::pending(), Duration::from_secs(30))
        .await
        .expect("Failed to claim");

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), vec!["text/plain".to_string()]);
    let done = IdempotencyRecord::done(200, headers, "Order created".to_string());
    store
        .put(&key, &done, Duration::from_secs(30))
        .await
        .expect("Failed to put");

    let found = store.get(&key).await.expect("Failed to get").unwrap();
    assert!(found.is_done());
    assert_eq!(found.status, 200);
    assert_eq!(found.body, "Order created");
    assert_eq!(found.headers["content-type"], vec!["text/plain".to_string()]);

    assert!(store.delete(&key).await.expect("Failed to delete"));
    assert!(!store.delete(&key).await.expect("Failed to delete"));
    assert!(store.get(&key).await.expect("Failed to get").is_none());
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_records_expire() {
    let store = store();
    let key = test_key();

    store
        .claim(&key, &IdempotencyRecord::pending(), Duration::from_millis(200))
        .await
        .expect("Failed to claim");
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(store.get(&key).await.expect("Failed to get").is_none());
    let reclaimed = store
        .claim(&key, &IdempotencyRecord::pending(), Duration::from_secs(30))
        .await
        .expect("Failed to claim");
    assert!(reclaimed);

    store.delete(&key).await.expect("Failed to delete");
}

#[tokio::test]
#[ignore = "Requires running Redis"]
async fn test_redis_ping() {
    store().ping().await.expect("Redis should answer PING");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "Requires running Redis"]
async fn test_redis_backed_gate_executes_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let routes = {
        let calls = calls.clone();
        Router::new().route(
            "/orders",
            get(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    "Order created"
                }
            }),
        )
    };
    let settings = IdempotencySettings {
        key_prefix: format!("idem-test-{}", Uuid::new_v4()),
        ..IdempotencySettings::default()
    };
    let (app, _) = build_app(routes, Arc::new(store()), &settings);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                send(&app, request("GET", "/orders", Some("2"), Some("1")))
                    .await
                    .status()
            })
        })
        .collect();

    for task in tasks {
        let status = task.await.unwrap();
        assert!(status == StatusCode::OK || status.as_u16() == 425);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let replay = send(&app, request("GET", "/orders", Some("2"), Some("1"))).await;
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(body_string(replay).await, "Order created");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store()
        .delete(&format!("{}:GET_/orders_2_1", settings.key_prefix))
        .await
        .expect("Failed to delete");
}
