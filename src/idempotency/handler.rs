use crate::config::IdempotencySettings;
use crate::error::Result;
use crate::idempotency::capture::{self, CapturedResponse};
use crate::idempotency::key_generator::{
    IdempotencyAttributes, IdempotencyKey, IdempotencyKeyGenerator, KeyGeneratorConfig,
};
use crate::idempotency::storage::{IdempotencyRecord, IdempotencyStore};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};
use axum::response::{IntoResponse, Response};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub bypassed_requests: AtomicU64,
    pub new_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub in_progress_requests: AtomicU64,
    pub completed_requests: AtomicU64,
    pub discarded_requests: AtomicU64,
    pub store_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypassed(&self) {
        self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_progress(&self) {
        self.in_progress_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            in_progress_requests: self.in_progress_requests.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            discarded_requests: self.discarded_requests.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub new_requests: u64,
    pub replayed_requests: u64,
    pub in_progress_requests: u64,
    pub completed_requests: u64,
    pub discarded_requests: u64,
    pub store_errors: u64,
}

impl MetricsSnapshot {
    /// Share of coordinated requests that turned out to be duplicates.
    pub fn duplicate_rate(&self) -> f64 {
        let duplicates = self.replayed_requests + self.in_progress_requests;
        let coordinated = self.new_requests + duplicates;
        if coordinated == 0 {
            0.0
        } else {
            duplicates as f64 / coordinated as f64
        }
    }
}

/// Result of trying to claim a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Claim succeeded; the caller owns the key and must run the handler
    Owner,
    /// Claim lost to a finished request; replay its response
    Replay(IdempotencyRecord),
    /// Claim lost to a request that is still running
    InProgress,
    /// The store could not be reached; run uncoordinated
    Unavailable,
}

impl ClaimOutcome {
    fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Owner => "new",
            ClaimOutcome::Replay(_) => "replayed",
            ClaimOutcome::InProgress => "in_progress",
            ClaimOutcome::Unavailable => "store_unavailable",
        }
    }
}

/// Configuration for the idempotency handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyHandlerConfig {
    pub ttl_seconds: u64,
    pub key_prefix: String,
    pub hash_keys: bool,
    pub methods: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for IdempotencyHandlerConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600, // 60 minutes
            key_prefix: "idem".to_string(),
            hash_keys: false,
            methods: vec!["GET".to_string()],
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl From<&IdempotencySettings> for IdempotencyHandlerConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        Self {
            ttl_seconds: settings.ttl_secs,
            key_prefix: settings.key_prefix.clone(),
            hash_keys: settings.hash_keys,
            methods: settings.methods.clone(),
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

/// Coordinates duplicate detection, execution and caching for keyed requests.
pub struct IdempotencyHandler {
    store: Arc<dyn IdempotencyStore>,
    key_generator: IdempotencyKeyGenerator,
    metrics: Arc<IdempotencyMetrics>,
    methods: Vec<Method>,
    config: IdempotencyHandlerConfig,
}

impl IdempotencyHandler {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyHandlerConfig) -> Self {
        let key_generator = IdempotencyKeyGenerator::new(KeyGeneratorConfig {
            key_prefix: config.key_prefix.clone(),
            hash_keys: config.hash_keys,
        });
        let methods = config
            .methods
            .iter()
            .filter_map(|m| match Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()) {
                Ok(method) => Some(method),
                Err(_) => {
                    tracing::warn!(method = %m, "Ignoring invalid idempotency method");
                    None
                }
            })
            .collect();

        Self {
            store,
            key_generator,
            metrics: Arc::new(IdempotencyMetrics::new()),
            methods,
            config,
        }
    }

    /// Gets the metrics for this handler.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    /// Whether requests with this method take part in coordination.
    pub fn is_target_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Generates the key for a request, or `None` if it lacks identity.
    pub fn generate_key(&self, attributes: &IdempotencyAttributes) -> Option<IdempotencyKey> {
        self.key_generator.generate(attributes)
    }

    /// Counts a request that skipped coordination.
    pub fn record_bypass(&self) {
        self.metrics.record_request();
        self.metrics.record_bypassed();
        get_metrics().record_idempotency_outcome("bypassed");
    }

    /// Attempts to become the owner of `key`.
    pub async fn claim(&self, key: &IdempotencyKey) -> ClaimOutcome {
        self.metrics.record_request();
        let outcome = self.try_claim(key).await;
        match &outcome {
            ClaimOutcome::Owner => self.metrics.record_new(),
            ClaimOutcome::Replay(_) => self.metrics.record_replayed(),
            ClaimOutcome::InProgress => self.metrics.record_in_progress(),
            ClaimOutcome::Unavailable => self.metrics.record_bypassed(),
        }
        get_metrics().record_idempotency_outcome(outcome.label());
        outcome
    }

    async fn try_claim(&self, key: &IdempotencyKey) -> ClaimOutcome {
        let ttl = self.ttl();

        // A record can vanish between a lost claim and the read that follows it,
        // when its owner discards a failure or the entry expires. One more claim
        // settles which case applies.
        for attempt in 0..2 {
            match self
                .store
                .claim(key.storage_key(), &IdempotencyRecord::pending(), ttl)
                .await
            {
                Ok(true) => {
                    tracing::info!(key = %key, "Idempotency key claimed");
                    return ClaimOutcome::Owner;
                }
                Ok(false) => {}
                Err(e) => {
                    self.metrics.record_store_error();
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Idempotency store unavailable, processing request without coordination"
                    );
                    return ClaimOutcome::Unavailable;
                }
            }

            match self.store.get(key.storage_key()).await {
                Ok(Some(record)) if record.is_done() => {
                    tracing::info!(key = %key, status = record.status, "Replaying cached response");
                    return ClaimOutcome::Replay(record);
                }
                Ok(Some(_)) => {
                    tracing::info!(key = %key, "Request is still processing");
                    return ClaimOutcome::InProgress;
                }
                Ok(None) => {
                    tracing::debug!(key = %key, attempt, "Claimed key disappeared before read");
                }
                Err(e) => {
                    self.metrics.record_store_error();
                    if e.is_store_unavailable() {
                        tracing::warn!(key = %key, error = %e, "Failed to read idempotency record");
                    } else {
                        tracing::warn!(key = %key, error = %e, "Corrupt idempotency record");
                    }
                    return ClaimOutcome::InProgress;
                }
            }
        }

        ClaimOutcome::InProgress
    }

    /// Persists or discards the owner's outcome.
    ///
    /// Only 2xx responses that can be replayed verbatim are stored; anything else
    /// deletes the key so that a retry starts fresh. Returns true if the response
    /// was cached.
    pub async fn complete(&self, key: &IdempotencyKey, response: &CapturedResponse) -> Result<bool> {
        let record = if response.is_success() {
            response.to_record(self.config.max_body_bytes)
        } else {
            None
        };

        match record {
            Some(record) => {
                self.store.put(key.storage_key(), &record, self.ttl()).await?;
                self.metrics.record_completed();
                tracing::info!(key = %key, status = record.status, "Cached response");
                Ok(true)
            }
            None => {
                self.discard(key).await?;
                tracing::info!(
                    key = %key,
                    status = response.status.as_u16(),
                    "Response not cached"
                );
                Ok(false)
            }
        }
    }

    /// Removes an owned key without caching anything.
    pub async fn discard(&self, key: &IdempotencyKey) -> Result<()> {
        self.store.delete(key.storage_key()).await?;
        self.metrics.record_discarded();
        Ok(())
    }

    /// Runs `operation` under idempotency control for `key`.
    ///
    /// `path` is the request path reported to duplicates that arrive too early.
    pub async fn execute<F, Fut>(&self, key: &IdempotencyKey, path: &str, operation: F) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        match self.claim(key).await {
            ClaimOutcome::Owner => {}
            ClaimOutcome::Replay(record) => return capture::replay(&record),
            ClaimOutcome::InProgress => return capture::in_progress(path),
            ClaimOutcome::Unavailable => return operation().await,
        }

        let timer = LatencyTimer::new();
        let response = operation().await;
        get_metrics().record_handler_latency(timer.elapsed_ms());

        let captured = match CapturedResponse::capture(response).await {
            Ok(captured) => captured,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to buffer response body");
                if let Err(e) = self.discard(key).await {
                    self.metrics.record_store_error();
                    tracing::error!(key = %key, error = %e, "Failed to discard idempotency key");
                }
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        if let Err(e) = self.complete(key, &captured).await {
            self.metrics.record_store_error();
            tracing::error!(key = %key, error = %e, "Failed to finalize idempotency key");
        }

        captured.into_response()
    }

    /// Runs cleanup of expired idempotency records.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.store.cleanup_expired().await
    }
}

/// Renders a request token for logs without exposing it.
pub fn masked_token(token: &str) -> String {
    mask_sensitive(token, 2)
}

/// Background cleanup job for expired idempotency records.
pub struct IdempotencyCleanupJob {
    handler: Arc<IdempotencyHandler>,
    interval_seconds: u64,
}

impl IdempotencyCleanupJob {
    pub fn new(handler: Arc<IdempotencyHandler>, interval_seconds: u64) -> Self {
        Self {
            handler,
            interval_seconds,
        }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        self.handler.cleanup_expired().await
    }

    /// Starts the cleanup job in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_seconds.max(1)));

            loop {
                interval.tick().await;

                match self.handler.cleanup_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency records", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}
