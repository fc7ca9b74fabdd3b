use axum::http::HeaderName;
use idempotency_gate::api::{create_router, AppState};
use idempotency_gate::config::{Settings, StoreBackend};
use idempotency_gate::error::AppError;
use idempotency_gate::idempotency::{
    IdempotencyCleanupJob, IdempotencyHandler, IdempotencyMiddleware, IdempotencyStore,
    MemoryIdempotencyStore, RedisIdempotencyStore,
};
use idempotency_gate::observability::{init_logging, init_metrics, LogConfig};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::from(&settings.application))?;
    info!("Configuration loaded");

    if let Err(errors) = settings.idempotency.validate() {
        for e in &errors {
            error!(field = %e.field, "{}", e.message);
        }
        return Err(AppError::Validation("invalid idempotency settings".to_string()).into());
    }

    let metrics_handle = init_metrics()?;

    let store: Arc<dyn IdempotencyStore> = match settings.idempotency.store {
        StoreBackend::Redis => {
            info!("Connecting to Redis at {}...", settings.redis.url);
            let store = RedisIdempotencyStore::open(&settings.redis.url)?;
            match store.ping().await {
                Ok(()) => info!("Redis connection established"),
                Err(e) => warn!(
                    "Redis unavailable at startup, requests bypass idempotency control until it recovers: {}",
                    e
                ),
            }
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory idempotency store; duplicates are only detected within this process");
            Arc::new(MemoryIdempotencyStore::new())
        }
    };

    let handler = Arc::new(IdempotencyHandler::new(store, (&settings.idempotency).into()));

    if settings.idempotency.store == StoreBackend::Memory {
        IdempotencyCleanupJob::new(handler.clone(), settings.idempotency.cleanup_interval_secs).start();
    }

    let middleware = Arc::new(IdempotencyMiddleware::from_settings(
        handler.clone(),
        &settings.idempotency,
    )?);
    let state = AppState::new(handler).with_metrics(metrics_handle);

    let request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state, middleware)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        paths = ?settings.idempotency.paths,
        methods = ?settings.idempotency.methods,
        ttl_secs = settings.idempotency.ttl_secs,
        "Listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
