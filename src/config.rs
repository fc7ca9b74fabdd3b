use http::Method;
use serde::Deserialize;
use std::time::Duration;

/// Longest record lifetime accepted from configuration (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub redis: RedisSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

/// Which backend holds idempotency records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    /// URL patterns subject to idempotency control (`/*`, `/api/*`, `*.json`, exact paths).
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_service_id_header")]
    pub service_id_header: String,
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub hash_keys: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_store")]
    pub store: StoreBackend,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_paths() -> Vec<String> {
    vec!["/*".to_string()]
}

fn default_ttl_secs() -> u64 {
    3600 // 60 minutes
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

fn default_service_id_header() -> String {
    "sid".to_string()
}

fn default_request_id_header() -> String {
    "rid".to_string()
}

fn default_key_prefix() -> String {
    "idem".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_store() -> StoreBackend {
    StoreBackend::Redis
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            ttl_secs: default_ttl_secs(),
            methods: default_methods(),
            service_id_header: default_service_id_header(),
            request_id_header: default_request_id_header(),
            key_prefix: default_key_prefix(),
            hash_keys: false,
            max_body_bytes: default_max_body_bytes(),
            store: default_store(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Validation error for a single settings field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl IdempotencySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.paths.is_empty() {
            errors.push(ValidationError::new("paths", "at least one path pattern is required"));
        }
        for pattern in &self.paths {
            if !is_valid_pattern(pattern) {
                errors.push(ValidationError::new(
                    "paths",
                    format!("invalid path pattern '{}'", pattern),
                ));
            }
        }
        if self.ttl_secs == 0 {
            errors.push(ValidationError::new("ttl_secs", "ttl_secs must be greater than zero"));
        }
        if self.ttl_secs > MAX_TTL_SECS {
            errors.push(ValidationError::new(
                "ttl_secs",
                format!("ttl_secs must not exceed {}", MAX_TTL_SECS),
            ));
        }
        if self.methods.is_empty() {
            errors.push(ValidationError::new("methods", "at least one HTTP method is required"));
        }
        for method in &self.methods {
            let name = method.trim();
            if name.is_empty() || Method::from_bytes(name.to_ascii_uppercase().as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    "methods",
                    format!("invalid HTTP method '{}'", method),
                ));
            }
        }
        if self.service_id_header.trim().is_empty() {
            errors.push(ValidationError::new("service_id_header", "service_id_header cannot be empty"));
        }
        if self.request_id_header.trim().is_empty() {
            errors.push(ValidationError::new("request_id_header", "request_id_header cannot be empty"));
        }
        if self
            .service_id_header
            .eq_ignore_ascii_case(&self.request_id_header)
        {
            errors.push(ValidationError::new(
                "request_id_header",
                "request_id_header and service_id_header must differ",
            ));
        }
        if self.key_prefix.trim().is_empty() {
            errors.push(ValidationError::new("key_prefix", "key_prefix cannot be empty"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// Servlet-style patterns: exact path, "/prefix/*" or "*.ext".
fn is_valid_pattern(pattern: &str) -> bool {
    if let Some(ext) = pattern.strip_prefix("*.") {
        return !ext.is_empty() && !ext.contains('/') && !ext.contains('*');
    }
    if !pattern.starts_with('/') {
        return false;
    }
    match pattern.find('*') {
        None => true,
        Some(idx) => idx == pattern.len() - 1 && pattern.ends_with("/*"),
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("idempotency.paths")
                    .with_list_parse_key("idempotency.methods")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
