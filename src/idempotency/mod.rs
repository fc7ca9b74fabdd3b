pub mod capture;
pub mod handler;
pub mod key_generator;
pub mod middleware;
pub mod storage;

pub use capture::{in_progress, replay, CapturedResponse, IN_PROGRESS_DETAIL};
pub use handler::{
    ClaimOutcome, IdempotencyCleanupJob, IdempotencyHandler, IdempotencyHandlerConfig,
    IdempotencyMetrics, MetricsSnapshot,
};
pub use key_generator::{
    normalize_path, IdempotencyAttributes, IdempotencyKey, IdempotencyKeyGenerator,
    KeyGeneratorConfig, DELIMITER,
};
pub use middleware::{idempotency_middleware, with_idempotency, IdempotencyMiddleware, PathMatcher};
pub use storage::{
    IdempotencyRecord, IdempotencyStatus, IdempotencyStore, MemoryIdempotencyStore,
    RedisIdempotencyStore,
};
