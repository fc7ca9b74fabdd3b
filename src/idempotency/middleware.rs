use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use crate::idempotency::handler::{masked_token, IdempotencyHandler};
use crate::idempotency::key_generator::IdempotencyAttributes;
use axum::extract::{Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use http::header::HeaderName;
use std::sync::Arc;

/// Servlet-style URL patterns: exact paths, `/prefix/*` and `*.ext`.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    patterns: Vec<PathPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    Prefix(String),
    Extension(String),
}

impl PathMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref().trim();
                if let Some(ext) = p.strip_prefix("*.") {
                    PathPattern::Extension(format!(".{}", ext))
                } else if let Some(prefix) = p.strip_suffix("/*") {
                    PathPattern::Prefix(prefix.to_string())
                } else {
                    PathPattern::Exact(p.to_string())
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(prefix) => {
                prefix.is_empty()
                    || path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            PathPattern::Extension(ext) => path.ends_with(ext.as_str()),
        })
    }
}

/// State shared by every invocation of the idempotency middleware.
pub struct IdempotencyMiddleware {
    handler: Arc<IdempotencyHandler>,
    paths: PathMatcher,
    service_id_header: HeaderName,
    request_id_header: HeaderName,
}

impl IdempotencyMiddleware {
    pub fn new(
        handler: Arc<IdempotencyHandler>,
        paths: PathMatcher,
        service_id_header: &str,
        request_id_header: &str,
    ) -> Result<Self> {
        Ok(Self {
            handler,
            paths,
            service_id_header: parse_header_name(service_id_header)?,
            request_id_header: parse_header_name(request_id_header)?,
        })
    }

    pub fn from_settings(handler: Arc<IdempotencyHandler>, settings: &IdempotencySettings) -> Result<Self> {
        Self::new(
            handler,
            PathMatcher::new(&settings.paths),
            &settings.service_id_header,
            &settings.request_id_header,
        )
    }

    pub fn handler(&self) -> Arc<IdempotencyHandler> {
        Arc::clone(&self.handler)
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| AppError::Validation(format!("invalid header name '{}'", name)))
}

fn header_str(request: &Request, name: &HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Wraps every route of `router` with idempotency control.
pub fn with_idempotency(router: Router, middleware: Arc<IdempotencyMiddleware>) -> Router {
    router.layer(from_fn_with_state(middleware, idempotency_middleware))
}

/// Applies idempotency control to a single request.
pub async fn idempotency_middleware(
    State(gate): State<Arc<IdempotencyMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !gate.paths.matches(&path) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    if !gate.handler.is_target_method(&method) {
        tracing::debug!(
            method = %method,
            "Request method didn't match the target idempotency methods"
        );
        gate.handler.record_bypass();
        return next.run(request).await;
    }

    let service_id = header_str(&request, &gate.service_id_header);
    let request_id = header_str(&request, &gate.request_id_header);

    let mut attributes = IdempotencyAttributes::new(method.as_str(), path.as_str());
    attributes.service_id = service_id.clone();
    attributes.request_id = request_id.clone();

    let Some(key) = gate.handler.generate_key(&attributes) else {
        tracing::warn!(
            path = %path,
            rid = ?request_id.as_deref().map(masked_token),
            sid = ?service_id,
            "Request should bring a request id and service id in its headers"
        );
        gate.handler.record_bypass();
        return next.run(request).await;
    };

    tracing::debug!(
        method = %method,
        path = %path,
        rid = %request_id.as_deref().map(masked_token).unwrap_or_default(),
        "Applying idempotency control"
    );

    gate.handler
        .execute(&key, &path, move || next.run(request))
        .await
}
