use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::api::responses::HealthResponse;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.health_checker.check_all().await;

    Json(HealthResponse {
        health,
        timestamp: chrono::Utc::now(),
        idempotency: state.idempotency.metrics().snapshot(),
    })
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}

// ============================================================================
// Order Handlers
// ============================================================================

/// Creates an order.
///
/// `curl -H "rid: 1" -H "sid: 2" http://localhost:8080/api/v1/orders`
pub async fn create_order() -> &'static str {
    tracing::info!("Creating order");
    "Order created"
}
