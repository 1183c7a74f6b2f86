#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, HeaderMap, Method, Request, StatusCode},
    Router,
};
use payment_idempotency::api::{create_router, AppState};
use payment_idempotency::config::IdempotencySettings;
use payment_idempotency::idempotency::InMemoryIdempotencyStore;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Response body is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).expect("Response body is not UTF-8")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// The payment API with default idempotency settings and a fresh store.
pub fn test_app() -> (Router, Arc<InMemoryIdempotencyStore>) {
    test_app_with(IdempotencySettings::default())
}

pub fn test_app_with(settings: IdempotencySettings) -> (Router, Arc<InMemoryIdempotencyStore>) {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let state = AppState::new(store.clone(), settings);
    let router = create_router(state).expect("Failed to build router");
    (router, store)
}

pub fn post_json(path: &str, headers: &[(&str, &str)], body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .expect("Failed to build request")
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("Router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn unique_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
