use crate::api::responses::ProblemDetail;
use crate::idempotency::storage::IdempotencyRecord;
use axum::body::{Body, Bytes};
use axum::response::{IntoResponse, Response};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::collections::BTreeMap;

/// Detail sent to duplicates that arrive while the original is still running.
pub const IN_PROGRESS_DETAIL: &str = "request is now processing, please try again later";

/// 425 Too Early.
pub fn too_early_status() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::CONFLICT)
}

/// A fully buffered downstream response.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Buffers the whole response body.
    ///
    /// Fails only if the body stream itself errors; the response is lost in that case.
    pub async fn capture(response: Response) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// True for 2xx responses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Converts the captured response into a done record.
    ///
    /// Returns `None` when the response cannot be replayed verbatim from text:
    /// a body over `max_body_bytes`, a body that is not UTF-8, or a header value
    /// that is not visible ASCII.
    pub fn to_record(&self, max_body_bytes: usize) -> Option<IdempotencyRecord> {
        if self.body.len() > max_body_bytes {
            return None;
        }
        let body = std::str::from_utf8(&self.body).ok()?.to_string();

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.headers {
            let value = value.to_str().ok()?;
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }

        Some(IdempotencyRecord::done(self.status.as_u16(), headers, body))
    }

    /// Rebuilds the live response for the original caller.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Writes a cached done record back as a response.
pub fn replay(record: &IdempotencyRecord) -> Response {
    let status = StatusCode::from_u16(record.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(record.body.clone()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, values) in &record.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "Skipping invalid cached header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => tracing::warn!(header = %name, "Skipping invalid cached header value"),
            }
        }
    }
    response
}

/// Response for a duplicate whose original is still being processed.
pub fn in_progress(path: &str) -> Response {
    let status = too_early_status();
    let problem = ProblemDetail::new(status, "Too Early", path, IN_PROGRESS_DETAIL);
    let body = serde_json::to_string(&problem).unwrap_or_default();

    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}
