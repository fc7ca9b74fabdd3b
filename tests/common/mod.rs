#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use idempotency_gate::config::IdempotencySettings;
use idempotency_gate::idempotency::{
    with_idempotency, IdempotencyHandler, IdempotencyMiddleware, IdempotencyStore,
    MemoryIdempotencyStore,
};
use std::sync::Arc;
use tower::ServiceExt;

pub fn test_settings() -> IdempotencySettings {
    IdempotencySettings::default()
}

/// Wraps `routes` with the idempotency middleware backed by `store`.
pub fn build_app(
    routes: Router,
    store: Arc<dyn IdempotencyStore>,
    settings: &IdempotencySettings,
) -> (Router, Arc<IdempotencyHandler>) {
    let handler = Arc::new(IdempotencyHandler::new(store, settings.into()));
    let middleware = Arc::new(
        IdempotencyMiddleware::from_settings(handler.clone(), settings)
            .expect("Failed to build middleware"),
    );
    (with_idempotency(routes, middleware), handler)
}

pub fn memory_app(routes: Router) -> (Router, Arc<MemoryIdempotencyStore>, Arc<IdempotencyHandler>) {
    let store = Arc::new(MemoryIdempotencyStore::new());
    let (app, handler) = build_app(routes, store.clone(), &test_settings());
    (app, store, handler)
}

pub fn request(method: &str, uri: &str, sid: Option<&str>, rid: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(sid) = sid {
        builder = builder.header("sid", sid);
    }
    if let Some(rid) = rid {
        builder = builder.header("rid", rid);
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("Router is infallible")
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Redis URL for tests that need a live server.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}
