use axum::{
    extract::{MatchedPath, Request},
    middleware::{from_fn, Next},
    response::Response,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use super::handlers;
use crate::idempotency::{with_idempotency, IdempotencyHandler, IdempotencyMiddleware};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub idempotency: Arc<IdempotencyHandler>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(idempotency: Arc<IdempotencyHandler>) -> Self {
        let health_checker = Arc::new(HealthChecker::new(idempotency.store()));
        Self {
            idempotency,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Routes guarded by idempotency control.
pub fn api_routes() -> Router {
    Router::new().route("/api/v1/orders", get(handlers::create_order))
}

/// Creates the main router: API routes behind the idempotency middleware plus
/// operational endpoints.
pub fn create_router(state: AppState, middleware: Arc<IdempotencyMiddleware>) -> Router {
    let ops = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        .with_state(state);

    with_idempotency(api_routes(), middleware)
        .merge(ops)
        .layer(from_fn(track_http_metrics))
}

/// Label used for requests that matched no route.
pub const UNMATCHED_PATH_LABEL: &str = "unmatched";

// Labels by route template so client-chosen paths cannot grow the series count.
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = metrics_path_label(&request);
    let timer = LatencyTimer::new();
    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

fn metrics_path_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH_LABEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_label_uses_route_template() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            move |request: Request, next: Next| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(metrics_path_label(&request));
                    next.run(request).await
                }
            }
        };
        let app = Router::new()
            .route("/orders/:id", get(|| async { "ok" }))
            .layer(from_fn(recorder));

        for uri in ["/orders/1", "/orders/2"] {
            let request = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
            app.clone().oneshot(request).await.unwrap();
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/orders/:id", "/orders/:id"]
        );
    }

    #[test]
    fn test_metrics_label_without_matched_route() {
        let request = axum::http::Request::builder()
            .uri("/random/client/path")
            .body(Body::empty())
            .unwrap();
        assert_eq!(metrics_path_label(&request), UNMATCHED_PATH_LABEL);
    }
}
