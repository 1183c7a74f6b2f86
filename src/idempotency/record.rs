use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

/// Content type recorded when the handler does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Cached outcome of one successful execution.
///
/// Records are immutable once saved; a key reused after expiry gets a
/// brand new record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status_code: u16,
    pub response_body: Bytes,
    pub content_type: String,
    pub request_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        key: impl Into<String>,
        status_code: u16,
        response_body: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            status_code,
            response_body: response_body.into(),
            content_type: content_type.into(),
            request_fingerprint: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.request_fingerprint = fingerprint;
        self
    }

    /// Returns true when the record was captured with a fingerprint that
    /// differs from `fingerprint`. Records without one never conflict.
    pub fn conflicts_with(&self, fingerprint: Option<&str>) -> bool {
        match (self.request_fingerprint.as_deref(), fingerprint) {
            (Some(stored), Some(incoming)) => stored != incoming,
            _ => false,
        }
    }
}

/// Replays the record verbatim: same status, body and content type.
impl IntoResponse for IdempotencyRecord {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        let mut response = Response::new(Body::from(self.response_body));
        *response.status_mut() = status;

        match HeaderValue::from_str(&self.content_type) {
            Ok(value) => {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            Err(_) => {
                tracing::warn!(
                    content_type = %self.content_type,
                    "Stored content type is not a valid header value, replaying without it"
                );
            }
        }

        response
    }
}
