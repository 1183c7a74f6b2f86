use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::requests::PaymentRequest;

/// Error body: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Payment processing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub processed_at: DateTime<Utc>,
    pub status: String,
}

impl PaymentResponse {
    /// A freshly processed payment with a new transaction id.
    pub fn processed(request: &PaymentRequest, status: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_id: Uuid::new_v4().to_string(),
            amount: request.amount,
            currency: request.currency.clone(),
            processed_at: Utc::now(),
            status: status.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPaymentResponse {
    pub success: bool,
    pub payments: Vec<PaymentResponse>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

impl BulkPaymentResponse {
    pub fn new(payments: Vec<PaymentResponse>) -> Self {
        let total_amount: Decimal = payments.iter().map(|p| p.amount).sum();
        Self {
            success: true,
            payments,
            total_amount,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub cached_records: usize,
}
