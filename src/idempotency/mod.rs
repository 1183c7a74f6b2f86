pub mod handler;
pub mod record;
pub mod route;
pub mod storage;

pub use handler::{
    hash_request, idempotency_middleware, IdempotencyCleanupJob, IdempotencyInterceptor,
    IdempotencyMetrics, InterceptorOptions, MetricsSnapshot,
};
pub use record::{IdempotencyRecord, DEFAULT_CONTENT_TYPE};
pub use route::{IdempotentRoutes, ResolvedRoute, RouteIdempotencyConfig};
pub use storage::{IdempotencyStore, InMemoryIdempotencyStore};
