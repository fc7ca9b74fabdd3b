use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator placed between key components.
pub const DELIMITER: char = '_';

const ESCAPE: char = '\\';

/// Configuration for idempotency key generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGeneratorConfig {
    /// Namespace for keys written to the store
    pub key_prefix: String,
    /// Store keys as SHA-256 digests instead of the raw composite
    pub hash_keys: bool,
}

impl Default for KeyGeneratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            hash_keys: false,
        }
    }
}

/// Request attributes that make up a request's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyAttributes {
    pub method: String,
    pub path: String,
    pub service_id: Option<String>,
    pub request_id: Option<String>,
}

impl IdempotencyAttributes {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            service_id: None,
            request_id: None,
        }
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Derived identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    composite: String,
    storage_key: String,
}

impl IdempotencyKey {
    /// The joined identity, e.g. `GET_/orders_2_1`.
    pub fn composite(&self) -> &str {
        &self.composite
    }

    /// The key under which the record lives in the store.
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite)
    }
}

/// Builds idempotency keys from request attributes.
#[derive(Debug, Clone)]
pub struct IdempotencyKeyGenerator {
    config: KeyGeneratorConfig,
}

impl IdempotencyKeyGenerator {
    pub fn new(config: KeyGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(KeyGeneratorConfig::default())
    }

    /// Generates the key for a request.
    ///
    /// Returns `None` when the caller id or the request token is missing or blank:
    /// such a request cannot be deduplicated and must pass straight through.
    pub fn generate(&self, attributes: &IdempotencyAttributes) -> Option<IdempotencyKey> {
        let service_id = non_blank(attributes.service_id.as_deref())?;
        let request_id = non_blank(attributes.request_id.as_deref())?;

        let method = attributes.method.trim().to_ascii_uppercase();
        let path = normalize_path(&attributes.path);

        let mut composite = String::with_capacity(
            method.len() + path.len() + service_id.len() + request_id.len() + 3,
        );
        for (i, component) in [method.as_str(), path.as_str(), service_id, request_id]
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                composite.push(DELIMITER);
            }
            push_escaped(&mut composite, component);
        }

        let storage_key = if self.config.hash_keys {
            let mut hasher = Sha256::new();
            hasher.update(composite.as_bytes());
            format!("{}:{}", self.config.key_prefix, hex::encode(hasher.finalize()))
        } else {
            format!("{}:{}", self.config.key_prefix, composite)
        };

        Some(IdempotencyKey {
            composite,
            storage_key,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// Escapes the delimiter and the escape character so the join stays injective.
fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Path component of a key: the request path as routed, without query or fragment.
///
/// Slashes are kept verbatim since the router treats `/orders` and `/orders/`
/// as distinct resources.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}
