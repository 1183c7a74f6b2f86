use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;

use crate::api::responses::ErrorResponse;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing required header: {0}")]
    MissingIdempotencyKey(String),

    #[error("Idempotency key reused with a different request payload")]
    PayloadMismatch(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid idempotency header name '{0}'")]
    InvalidHeaderName(String),

    #[error("Idempotency TTL of {0} seconds is out of range")]
    InvalidTtl(u64),

    #[error("Idempotency store error: {0}")]
    Store(String),

    #[error("Idempotency store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingIdempotencyKey(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadMismatch(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed with internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_message_names_header() {
        let err = AppError::MissingIdempotencyKey("X-Idemp-Key".to_string());
        assert_eq!(err.to_string(), "Missing required header: X-Idemp-Key");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::PayloadMismatch("k".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Store("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_io_failure_propagates_as_internal_error() {
        fn bind() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"))?;
            Ok(())
        }

        let err = bind().unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: address in use");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
