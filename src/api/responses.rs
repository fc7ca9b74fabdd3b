use crate::idempotency::MetricsSnapshot;
use crate::observability::AggregatedHealth;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// RFC 9457 problem details object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetail {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetail {
    pub fn new(
        status: StatusCode,
        title: impl Into<String>,
        problem_type: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            problem_type: problem_type.into(),
            title: title.into(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub health: AggregatedHealth,
    pub timestamp: DateTime<Utc>,
    pub idempotency: MetricsSnapshot,
}
