use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::IdempotencySettings;
use crate::error::Result;
use crate::idempotency::{
    idempotency_middleware, IdempotencyInterceptor, IdempotentRoutes, InMemoryIdempotencyStore,
    RouteIdempotencyConfig,
};

pub const PAYMENTS_PATH: &str = "/api/payments";
pub const QUICK_PAYMENTS_PATH: &str = "/api/payments/quick";
pub const BULK_PAYMENTS_PATH: &str = "/api/payments/bulk";
pub const REGULAR_PAYMENTS_PATH: &str = "/api/payments/regular";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryIdempotencyStore>,
    pub idempotency: IdempotencySettings,
    pub metrics_handle: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<InMemoryIdempotencyStore>, idempotency: IdempotencySettings) -> Self {
        Self {
            store,
            idempotency,
            metrics_handle: None,
            started_at: Instant::now(),
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Idempotency declarations for the payment endpoints. The regular endpoint
/// is deliberately absent.
pub fn payment_routes(defaults: &RouteIdempotencyConfig) -> Result<IdempotentRoutes> {
    IdempotentRoutes::new()
        .register(Method::POST, PAYMENTS_PATH, defaults.clone())?
        .register(
            Method::POST,
            QUICK_PAYMENTS_PATH,
            RouteIdempotencyConfig::new("X-Idemp-Key", 60),
        )?
        .register(
            Method::POST,
            BULK_PAYMENTS_PATH,
            defaults.clone().with_ttl_seconds(600),
        )
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Result<Router> {
    let routes = payment_routes(&state.idempotency.route_defaults())?;
    let interceptor = Arc::new(IdempotencyInterceptor::new(
        state.store.clone(),
        Arc::new(routes),
        state.idempotency.interceptor_options(),
    ));

    let router = Router::new()
        // Payment endpoints
        .route(PAYMENTS_PATH, post(handlers::create_payment))
        .route(QUICK_PAYMENTS_PATH, post(handlers::quick_payment))
        .route(BULK_PAYMENTS_PATH, post(handlers::bulk_payment))
        .route(REGULAR_PAYMENTS_PATH, post(handlers::regular_payment))
        .route_layer(middleware::from_fn_with_state(interceptor, idempotency_middleware))
        // Operational endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state);

    Ok(router)
}
