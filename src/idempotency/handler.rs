use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, Result};
use crate::idempotency::record::{IdempotencyRecord, DEFAULT_CONTENT_TYPE};
use crate::idempotency::route::{IdempotentRoutes, ResolvedRoute};
use crate::idempotency::storage::IdempotencyStore;
use crate::observability::{get_metrics, mask_key};

/// Counters for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub captured_responses: AtomicU64,
    pub uncached_responses: AtomicU64,
    pub rejected_requests: AtomicU64,
    pub store_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("replayed");
    }

    pub fn record_executed(&self) {
        self.executed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captured(&self) {
        self.captured_responses.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("captured");
    }

    pub fn record_uncached(&self) {
        self.uncached_responses.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("uncached");
    }

    pub fn record_rejected(&self, reason: &str) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_rejection(reason);
    }

    pub fn record_store_error(&self, operation: &str) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_store_error(operation);
    }

    pub fn replay_rate(&self) -> f64 {
        self.snapshot().replay_rate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            captured_responses: self.captured_responses.load(Ordering::Relaxed),
            uncached_responses: self.uncached_responses.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub replayed_requests: u64,
    pub executed_requests: u64,
    pub captured_responses: u64,
    pub uncached_responses: u64,
    pub rejected_requests: u64,
    pub store_errors: u64,
}

impl MetricsSnapshot {
    pub fn replay_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.replayed_requests as f64 / self.total_requests as f64
        }
    }
}

/// Runtime knobs for the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorOptions {
    /// Serialize concurrent requests carrying the same key.
    pub single_flight: bool,
    /// Reject a replay whose request payload differs from the original.
    pub verify_payload: bool,
    /// Upper bound for a single store `get` or `save`.
    pub store_timeout: Duration,
    /// Largest request or response body that will be buffered.
    pub max_body_bytes: usize,
}

impl Default for InterceptorOptions {
    fn default() -> Self {
        Self {
            single_flight: true,
            verify_payload: false,
            store_timeout: Duration::from_millis(250),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Releases the per-key lock and drops the table slot once nobody waits on it.
/// Also runs when a waiter is cancelled before it acquires the lock.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.in_flight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// A lock acquisition in progress. Fields drop in declaration order, so a
/// cancelled waiter releases its slot reference before the cleanup check.
struct PendingFlight<'a, F> {
    acquire: Pin<Box<F>>,
    flight: InFlightGuard<'a>,
}

/// Wraps handlers of registered routes with replay-or-execute semantics.
pub struct IdempotencyInterceptor {
    store: Arc<dyn IdempotencyStore>,
    routes: Arc<IdempotentRoutes>,
    options: InterceptorOptions,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyInterceptor {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        routes: Arc<IdempotentRoutes>,
        options: InterceptorOptions,
    ) -> Self {
        Self {
            store,
            routes,
            options,
            in_flight: DashMap::new(),
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &InterceptorOptions {
        &self.options
    }

    /// Number of keys with a request currently executing or waiting.
    pub fn in_flight_keys(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs `request` through the idempotency state machine. `run` is the
    /// wrapped handler pipeline and is invoked at most once.
    pub async fn intercept<F, Fut>(&self, request: Request, run: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let route = {
            let path = request
                .extensions()
                .get::<MatchedPath>()
                .map(|matched| matched.as_str())
                .unwrap_or_else(|| request.uri().path());
            self.routes.lookup(request.method(), path).cloned()
        };

        let Some(route) = route else {
            return run(request).await;
        };

        self.metrics.record_request();

        let key = match extract_key(request.headers(), &route) {
            Ok(key) => key,
            Err(e) => {
                self.metrics.record_rejected("missing_key");
                tracing::debug!(header = %route.header_name(), "Rejected request without idempotency key");
                return e.into_response();
            }
        };

        let (request, fingerprint) = if self.options.verify_payload {
            match self.fingerprint(request).await {
                Ok(pair) => pair,
                Err(e) => {
                    self.metrics.record_rejected("unreadable_body");
                    return e.into_response();
                }
            }
        } else {
            (request, None)
        };

        let _flight = if self.options.single_flight {
            Some(self.enter_flight(&key).await)
        } else {
            None
        };

        if let Some(record) = self.lookup(&key).await {
            if record.conflicts_with(fingerprint.as_deref()) {
                self.metrics.record_rejected("payload_mismatch");
                tracing::warn!(key = %mask_key(&key), "Idempotency key reused with a different payload");
                return AppError::PayloadMismatch(key).into_response();
            }

            self.metrics.record_replay();
            tracing::info!(key = %mask_key(&key), "Returning cached response for idempotency key");
            return record.into_response();
        }

        self.metrics.record_executed();
        let response = run(request).await;
        self.capture(key, &route, fingerprint, response).await
    }

    /// Waits for exclusive execution rights on `key`.
    async fn enter_flight(&self, key: &str) -> InFlightGuard<'_> {
        let lock = Arc::clone(&self.in_flight.entry(key.to_string()).or_default());
        let mut pending = PendingFlight {
            acquire: Box::pin(lock.lock_owned()),
            flight: InFlightGuard {
                in_flight: &self.in_flight,
                key: key.to_string(),
                guard: None,
            },
        };
        let guard = (&mut pending.acquire).await;

        let PendingFlight { mut flight, .. } = pending;
        flight.guard = Some(guard);
        flight
    }

    /// Store read that fails open: errors and timeouts count as a miss.
    async fn lookup(&self, key: &str) -> Option<IdempotencyRecord> {
        match tokio::time::timeout(self.options.store_timeout, self.store.get(key)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                self.metrics.record_store_error("get");
                tracing::warn!(key = %mask_key(key), error = %e, "Idempotency store lookup failed, treating as miss");
                None
            }
            Err(_) => {
                self.metrics.record_store_error("get");
                let e = AppError::StoreTimeout(self.options.store_timeout);
                tracing::warn!(key = %mask_key(key), error = %e, "Idempotency store lookup timed out, treating as miss");
                None
            }
        }
    }

    /// Buffers a 2xx response and persists it. Anything else passes through.
    async fn capture(
        &self,
        key: String,
        route: &ResolvedRoute,
        fingerprint: Option<String>,
        response: Response,
    ) -> Response {
        let status = response.status();
        if !status.is_success() {
            self.metrics.record_uncached();
            tracing::debug!(key = %mask_key(&key), status = status.as_u16(), "Not caching unsuccessful response");
            return response;
        }

        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, self.options.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_uncached();
                return AppError::Internal(anyhow::anyhow!(
                    "Failed to buffer response for idempotency capture: {}",
                    e
                ))
                .into_response();
            }
        };

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let record = IdempotencyRecord::new(key.clone(), status.as_u16(), bytes.clone(), content_type)
            .with_fingerprint(fingerprint);
        self.persist(record, route.ttl()).await;

        Response::from_parts(parts, Body::from(bytes))
    }

    /// Store write that never fails the request.
    async fn persist(&self, record: IdempotencyRecord, ttl: Duration) {
        let key = record.key.clone();
        match tokio::time::timeout(self.options.store_timeout, self.store.save(record, ttl)).await {
            Ok(Ok(())) => {
                self.metrics.record_captured();
                tracing::info!(key = %mask_key(&key), ttl_seconds = ttl.as_secs(), "Cached response for idempotency key");
            }
            Ok(Err(e)) => {
                self.metrics.record_store_error("save");
                tracing::error!(key = %mask_key(&key), error = %e, "Failed to cache idempotent response");
            }
            Err(_) => {
                self.metrics.record_store_error("save");
                let e = AppError::StoreTimeout(self.options.store_timeout);
                tracing::error!(key = %mask_key(&key), error = %e, "Failed to cache idempotent response");
            }
        }
    }

    /// Buffers the request body and returns the rebuilt request with its
    /// fingerprint.
    async fn fingerprint(&self, request: Request) -> Result<(Request, Option<String>)> {
        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, self.options.max_body_bytes)
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read request body: {}", e)))?;

        let fingerprint = hash_request(&parts.method, parts.uri.path(), &bytes);
        Ok((Request::from_parts(parts, Body::from(bytes)), Some(fingerprint)))
    }
}

/// Axum middleware entry point, installed with `route_layer` so the matched
/// route path is available.
pub async fn idempotency_middleware(
    State(interceptor): State<Arc<IdempotencyInterceptor>>,
    request: Request,
    next: Next,
) -> Response {
    interceptor.intercept(request, |request| next.run(request)).await
}

/// Reads the route's key header. Absent, empty or non-ASCII values are
/// rejected.
fn extract_key(headers: &HeaderMap, route: &ResolvedRoute) -> Result<String> {
    headers
        .get(route.header())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::MissingIdempotencyKey(route.header_name().to_string()))
}

/// SHA-256 over method, path and body.
pub fn hash_request(method: &Method, path: &str, body: &Bytes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Background sweep of expired idempotency records.
pub struct IdempotencyCleanupJob {
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
}

impl IdempotencyCleanupJob {
    pub fn new(store: Arc<dyn IdempotencyStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs the sweep once.
    pub async fn run_once(&self) -> Result<u64> {
        self.store.purge_expired().await
    }

    /// Starts the sweep in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        if count > 0 {
                            get_metrics().record_records_purged(count);
                            tracing::info!("Cleaned up {} expired idempotency records", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to clean up expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::route::RouteIdempotencyConfig;
    use axum::http::HeaderValue;

    fn resolved(header: &str) -> ResolvedRoute {
        let routes = IdempotentRoutes::new()
            .register(Method::POST, "/p", RouteIdempotencyConfig::new(header, 60))
            .unwrap();
        routes.lookup(&Method::POST, "/p").unwrap().clone()
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = IdempotencyMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_replay();
        metrics.record_executed();
        metrics.record_captured();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.replayed_requests, 1);
        assert_eq!(snapshot.executed_requests, 1);
        assert_eq!(snapshot.captured_responses, 1);
        assert_eq!(snapshot.replay_rate(), 0.5);
    }

    #[test]
    fn test_extract_key_reads_configured_header() {
        let route = resolved("X-Idemp-Key");
        let mut headers = HeaderMap::new();
        headers.insert("x-idemp-key", HeaderValue::from_static("Abc-123"));

        assert_eq!(extract_key(&headers, &route).unwrap(), "Abc-123");
    }

    #[test]
    fn test_extract_key_rejects_missing_and_empty() {
        let route = resolved("Idempotency-Key");
        let mut headers = HeaderMap::new();

        let err = extract_key(&headers, &route).unwrap_err();
        assert_eq!(err.to_string(), "Missing required header: Idempotency-Key");

        headers.insert("idempotency-key", HeaderValue::from_static(""));
        assert!(matches!(
            extract_key(&headers, &route),
            Err(AppError::MissingIdempotencyKey(_))
        ));
    }

    #[test]
    fn test_hash_request_is_deterministic_and_sensitive() {
        let body = Bytes::from_static(br#"{"amount":1}"#);
        let a = hash_request(&Method::POST, "/p", &body);
        let b = hash_request(&Method::POST, "/p", &body);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other = Bytes::from_static(br#"{"amount":2}"#);
        assert_ne!(a, hash_request(&Method::POST, "/p", &other));
        assert_ne!(a, hash_request(&Method::POST, "/q", &body));
    }

    fn interceptor() -> IdempotencyInterceptor {
        IdempotencyInterceptor::new(
            Arc::new(crate::idempotency::InMemoryIdempotencyStore::new()),
            Arc::new(IdempotentRoutes::new()),
            InterceptorOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_after_release_leaves_no_slot() {
        let interceptor = interceptor();
        let holder = interceptor.enter_flight("k").await;

        let mut waiter = Box::pin(interceptor.enter_flight("k"));
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut waiter)
            .await
            .is_err());
        assert_eq!(interceptor.in_flight_keys(), 1);

        drop(holder);
        assert_eq!(interceptor.in_flight_keys(), 1);

        drop(waiter);
        assert_eq!(interceptor.in_flight_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_before_release_leaves_no_slot() {
        let interceptor = interceptor();
        let holder = interceptor.enter_flight("k").await;

        let waiter = interceptor.enter_flight("k");
        assert!(tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .is_err());

        drop(holder);
        assert_eq!(interceptor.in_flight_keys(), 0);

        let again = interceptor.enter_flight("k").await;
        assert_eq!(interceptor.in_flight_keys(), 1);
        drop(again);
        assert_eq!(interceptor.in_flight_keys(), 0);
    }

    #[test]
    fn test_default_options() {
        let options = InterceptorOptions::default();
        assert!(options.single_flight);
        assert!(!options.verify_payload);
        assert_eq!(options.store_timeout, Duration::from_millis(250));
    }
}
