use thiserror::Error;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Returns true if the error comes from the backing store being unreachable
    /// or rejecting a command, as opposed to bad data.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, AppError::Redis(_) | AppError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
