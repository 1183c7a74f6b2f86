use rust_decimal::Decimal;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::ApplicationSettings;
use crate::error::{AppError, Result};

/// Configuration for logging.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
    pub include_file: bool,
    pub include_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
            include_file: false,
            include_line: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>, format: impl AsRef<str>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::from(format.as_ref()),
            ..Self::default()
        }
    }
}

impl From<&ApplicationSettings> for LogConfig {
    fn from(settings: &ApplicationSettings) -> Self {
        Self {
            include_file: settings.log_include_file,
            include_line: settings.log_include_line,
            ..Self::new(settings.log_level.clone(), &settings.log_format)
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

fn fmt_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_target(config.include_target)
        .with_file(config.include_file)
        .with_line_number(config.include_line);

    match config.format {
        LogFormat::Json => layer.json().with_span_events(FmtSpan::CLOSE).boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install log subscriber: {}", e)))?;

    tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

/// Masks all but the first and last `visible_chars` characters.
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        return "*".repeat(chars.len());
    }

    let prefix: String = chars[..visible_chars].iter().collect();
    let suffix: String = chars[chars.len() - visible_chars..].iter().collect();
    let masked_len = chars.len() - visible_chars * 2;

    format!("{}{}{}", prefix, "*".repeat(masked_len), suffix)
}

/// Idempotency keys are client secrets in practice; log only their edges.
pub fn mask_key(key: &str) -> String {
    mask_sensitive(key, 4)
}

/// Masks currency amounts for logging (shows magnitude only).
pub fn mask_amount(amount: &Decimal) -> String {
    let abs = amount.abs();
    if abs >= Decimal::from(1_000_000) {
        "***M+".to_string()
    } else if abs >= Decimal::from(1_000) {
        "***K+".to_string()
    } else {
        "***".to_string()
    }
}
