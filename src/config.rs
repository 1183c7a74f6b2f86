use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::error::Result;
use crate::idempotency::{InterceptorOptions, RouteIdempotencyConfig};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[validate]
    pub application: ApplicationSettings,
    #[validate]
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplicationSettings {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    #[serde(default)]
    pub log_include_file: bool,
    #[serde(default)]
    pub log_include_line: bool,
}

/// Idempotency settings. `header_name` and `ttl_seconds` are the defaults
/// applied to routes registered without explicit overrides.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdempotencySettings {
    #[validate(length(min = 1))]
    pub header_name: String,
    #[validate(range(min = 1, max = 31536000))]
    pub ttl_seconds: u64,
    #[validate(range(min = 1))]
    pub sweep_interval_seconds: u64,
    #[validate(range(min = 1))]
    pub store_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,
    pub single_flight: bool,
    pub verify_payload: bool,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            header_name: RouteIdempotencyConfig::DEFAULT_HEADER_NAME.to_string(),
            ttl_seconds: RouteIdempotencyConfig::DEFAULT_TTL_SECONDS,
            sweep_interval_seconds: 60,
            store_timeout_ms: 250,
            max_body_bytes: 1024 * 1024,
            single_flight: true,
            verify_payload: false,
        }
    }
}

impl IdempotencySettings {
    /// Route configuration used by routes that take the defaults.
    pub fn route_defaults(&self) -> RouteIdempotencyConfig {
        RouteIdempotencyConfig::new(self.header_name.clone(), self.ttl_seconds)
    }

    pub fn interceptor_options(&self) -> InterceptorOptions {
        InterceptorOptions {
            single_flight: self.single_flight,
            verify_payload: self.verify_payload,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}
