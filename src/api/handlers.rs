use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::api::requests::PaymentRequest;
use crate::api::responses::{BulkPaymentResponse, HealthResponse, PaymentResponse};
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, mask_amount, LatencyTimer};

use super::routes::AppState;

/// Simulated payment flavours served by the demo endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentKind {
    Standard,
    Quick,
    Bulk,
    Regular,
}

impl PaymentKind {
    pub fn status_label(&self) -> &'static str {
        match self {
            PaymentKind::Standard => "Completed",
            PaymentKind::Quick => "Quick-Processed",
            PaymentKind::Bulk => "Bulk-Processed",
            PaymentKind::Regular => "Regular-Processed",
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            PaymentKind::Standard => "standard",
            PaymentKind::Quick => "quick",
            PaymentKind::Bulk => "bulk",
            PaymentKind::Regular => "regular",
        }
    }
}

fn process_payment(request: &PaymentRequest, kind: PaymentKind) -> Result<PaymentResponse> {
    request.validate()?;

    tracing::info!(
        kind = kind.metric_label(),
        amount = %mask_amount(&request.amount),
        currency = %request.currency,
        "Processing payment"
    );

    let response = PaymentResponse::processed(request, kind.status_label());
    get_metrics().record_payment_processed(kind.metric_label(), &request.currency);
    Ok(response)
}

// ============================================================================
// Payment Handlers
// ============================================================================

/// Create a payment. Idempotent with the default header and TTL.
pub async fn create_payment(Json(request): Json<PaymentRequest>) -> Result<Json<PaymentResponse>> {
    let timer = LatencyTimer::new();
    let response = process_payment(&request, PaymentKind::Standard)?;
    get_metrics().record_payment_latency(PaymentKind::Standard.metric_label(), timer.elapsed_ms());
    Ok(Json(response))
}

/// Quick payment. Idempotent under `X-Idemp-Key` for 60 seconds.
pub async fn quick_payment(Json(request): Json<PaymentRequest>) -> Result<Json<PaymentResponse>> {
    let timer = LatencyTimer::new();
    let response = process_payment(&request, PaymentKind::Quick)?;
    get_metrics().record_payment_latency(PaymentKind::Quick.metric_label(), timer.elapsed_ms());
    Ok(Json(response))
}

/// Bulk payment. Idempotent with an extended TTL.
pub async fn bulk_payment(
    Json(requests): Json<Vec<PaymentRequest>>,
) -> Result<Json<BulkPaymentResponse>> {
    if requests.is_empty() {
        return Err(AppError::Validation(
            "bulk payment requires at least one payment".to_string(),
        ));
    }

    let timer = LatencyTimer::new();
    tracing::info!(count = requests.len(), "Processing bulk payment");

    let payments = requests
        .iter()
        .map(|request| process_payment(request, PaymentKind::Bulk))
        .collect::<Result<Vec<_>>>()?;

    get_metrics().record_payment_latency(PaymentKind::Bulk.metric_label(), timer.elapsed_ms());
    Ok(Json(BulkPaymentResponse::new(payments)))
}

/// Regular payment without idempotency; every call creates a new transaction.
pub async fn regular_payment(Json(request): Json<PaymentRequest>) -> Result<Json<PaymentResponse>> {
    let timer = LatencyTimer::new();
    let response = process_payment(&request, PaymentKind::Regular)?;
    get_metrics().record_payment_latency(PaymentKind::Regular.metric_label(), timer.elapsed_ms());
    Ok(Json(response))
}

// ============================================================================
// Operational Handlers
// ============================================================================

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        cached_records: state.store.len(),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed").into_response(),
    }
}
