use http::{HeaderName, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Per-route idempotency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteIdempotencyConfig {
    pub header_name: String,
    pub ttl_seconds: u64,
}

impl Default for RouteIdempotencyConfig {
    fn default() -> Self {
        Self {
            header_name: Self::DEFAULT_HEADER_NAME.to_string(),
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
        }
    }
}

impl RouteIdempotencyConfig {
    pub const DEFAULT_HEADER_NAME: &'static str = "Idempotency-Key";
    pub const DEFAULT_TTL_SECONDS: u64 = 300;
    /// One year. Keep in sync with the `ttl_seconds` bound in `IdempotencySettings`.
    pub const MAX_TTL_SECONDS: u64 = 31_536_000;

    pub fn new(header_name: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            header_name: header_name.into(),
            ttl_seconds,
        }
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// A route declaration with its header name parsed once at registration.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    config: RouteIdempotencyConfig,
    header: HeaderName,
}

impl ResolvedRoute {
    fn resolve(config: RouteIdempotencyConfig) -> Result<Self> {
        if config.ttl_seconds > RouteIdempotencyConfig::MAX_TTL_SECONDS {
            return Err(AppError::InvalidTtl(config.ttl_seconds));
        }
        let header = HeaderName::from_bytes(config.header_name.as_bytes())
            .map_err(|_| AppError::InvalidHeaderName(config.header_name.clone()))?;
        Ok(Self { config, header })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Header name as declared, used verbatim in client-facing errors.
    pub fn header_name(&self) -> &str {
        &self.config.header_name
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl()
    }

    pub fn config(&self) -> &RouteIdempotencyConfig {
        &self.config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: Method,
    path: String,
}

/// Registry of idempotent routes keyed by method and route path template
/// (e.g. `/api/payments/:id`). Routes not registered here are passed through.
#[derive(Debug, Clone, Default)]
pub struct IdempotentRoutes {
    routes: HashMap<RouteKey, ResolvedRoute>,
}

impl IdempotentRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `method path` as idempotent. Fails if the header name is not a
    /// valid HTTP header name or the TTL exceeds `MAX_TTL_SECONDS`.
    pub fn register(
        mut self,
        method: Method,
        path: impl Into<String>,
        config: RouteIdempotencyConfig,
    ) -> Result<Self> {
        let route = ResolvedRoute::resolve(config)?;
        let key = RouteKey {
            method,
            path: path.into(),
        };
        tracing::debug!(
            method = %key.method,
            path = %key.path,
            header = %route.header_name(),
            ttl_seconds = route.config.ttl_seconds,
            "Registered idempotent route"
        );
        self.routes.insert(key, route);
        Ok(self)
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&ResolvedRoute> {
        self.routes.get(&RouteKey {
            method: method.clone(),
            path: path.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RouteIdempotencyConfig::default();
        assert_eq!(config.header_name, "Idempotency-Key");
        assert_eq!(config.ttl_seconds, 300);
        assert_eq!(config.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_builder_overrides() {
        let config = RouteIdempotencyConfig::default()
            .with_header_name("X-Idemp-Key")
            .with_ttl_seconds(60);
        assert_eq!(config, RouteIdempotencyConfig::new("X-Idemp-Key", 60));
    }

    #[test]
    fn test_lookup_matches_method_and_path() {
        let routes = IdempotentRoutes::new()
            .register(Method::POST, "/api/payments", RouteIdempotencyConfig::default())
            .unwrap();

        let route = routes.lookup(&Method::POST, "/api/payments").unwrap();
        assert_eq!(route.header_name(), "Idempotency-Key");
        assert_eq!(route.header().as_str(), "idempotency-key");
        assert!(routes.lookup(&Method::PUT, "/api/payments").is_none());
        assert!(routes.lookup(&Method::POST, "/api/payments/regular").is_none());
    }

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let result = IdempotentRoutes::new().register(
            Method::POST,
            "/x",
            RouteIdempotencyConfig::new("bad header", 10),
        );
        assert!(matches!(result, Err(AppError::InvalidHeaderName(name)) if name == "bad header"));
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        let max = RouteIdempotencyConfig::MAX_TTL_SECONDS;
        let accepted = IdempotentRoutes::new().register(
            Method::POST,
            "/x",
            RouteIdempotencyConfig::default().with_ttl_seconds(max),
        );
        assert!(accepted.is_ok());

        let result = IdempotentRoutes::new().register(
            Method::POST,
            "/x",
            RouteIdempotencyConfig::default().with_ttl_seconds(u64::MAX),
        );
        assert!(matches!(result, Err(AppError::InvalidTtl(ttl)) if ttl == u64::MAX));
    }
}
