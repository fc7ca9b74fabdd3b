use idempotency_gate::config::ApplicationSettings;
use idempotency_gate::idempotency::{IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore};
use idempotency_gate::observability::{
    mask_sensitive, AggregatedHealth, DependencyHealth, HealthChecker, HealthStatus, LatencyTimer,
    LogConfig, LogFormat, Metrics,
};
use std::sync::Arc;
use tokio_test::assert_ok;

#[test]
fn test_log_config_default() {
    let config = LogConfig::default();
    assert_eq!(config.level, "info");
    assert!(config.include_target);
    assert!(!config.include_file);
    assert!(!config.include_line);
}

#[test]
fn test_log_config_follows_application_settings() {
    let settings = ApplicationSettings {
        host: "127.0.0.1".to_string(),
        port: 8080,
        log_level: "debug".to_string(),
        log_format: "json".to_string(),
    };
    let config = LogConfig::from(&settings);
    assert_eq!(config.level, "debug");
    assert_eq!(config.format, LogFormat::Json);
}

#[test]
fn test_log_format_from_str() {
    assert_eq!(LogFormat::from("json"), LogFormat::Json);
    assert_eq!(LogFormat::from("COMPACT"), LogFormat::Compact);
    assert_eq!(LogFormat::from("unknown"), LogFormat::Pretty);
}

#[test]
fn test_mask_sensitive_request_ids() {
    assert_eq!(mask_sensitive("abc", 2), "***");
    assert_eq!(mask_sensitive("1234", 2), "****");
    assert_eq!(mask_sensitive("req-0042-abcd", 2), "re*********cd");
}

#[test]
fn test_metrics_without_recorder() {
    let metrics = Metrics::new();
    metrics.record_idempotency_outcome("replayed");
    metrics.record_store_operation("get", 0.4, true);
    metrics.record_http_request("GET", "/api/v1/orders", 200, 2.5);
}

#[test]
fn test_latency_timer_measures() {
    let timer = LatencyTimer::default();
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(timer.elapsed_ms() >= 5.0);
}

#[test]
fn test_dependency_health_constructors() {
    let healthy = DependencyHealth::healthy("redis", 1.2);
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert_eq!(healthy.latency_ms, Some(1.2));
    assert!(healthy.message.is_none());

    let degraded = DependencyHealth::degraded("redis", "PING timeout");
    assert!(degraded.status.is_degraded());
    assert_eq!(degraded.message.as_deref(), Some("PING timeout"));
}

#[test]
fn test_aggregated_health_serialization() {
    let health = AggregatedHealth::new(
        "0.1.0".to_string(),
        42,
        vec![DependencyHealth::degraded("redis", "down")],
    );
    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["uptime_seconds"], 42);
    assert_eq!(json["dependencies"][0]["name"], "redis");
}

#[tokio::test]
async fn test_health_checker_with_memory_store() {
    let store = Arc::new(MemoryIdempotencyStore::new());
    assert_ok!(store.ping().await);

    let checker = HealthChecker::new(store);
    let health = checker.check_all().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(checker.is_ready().await);
}

#[tokio::test]
async fn test_unreachable_store_degrades_but_stays_ready() {
    let store = Arc::new(RedisIdempotencyStore::open("redis://127.0.0.1:1/").unwrap());
    let checker = HealthChecker::new(store);

    let health = checker.check_store().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.message.is_some());
    assert!(checker.is_alive());
    assert!(checker.is_ready().await);
}
