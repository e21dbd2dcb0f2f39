//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//!
//! Layer stack (outermost → innermost):
//! 1. CORS → 2. HTTP timeout, set above the gateway deadline

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Headroom the HTTP layer allows beyond the gateway deadline.
pub const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Build the API router. `request_timeout` is the gateway deadline.
pub fn api_router(ctx: ApiContext, request_timeout: Duration) -> Router {
    Router::new()
        .route("/analyze", post(endpoints::analyze::analyze))
        .route("/health", get(endpoints::health::check))
        .with_state(ctx)
        .layer(TimeoutLayer::new(request_timeout + HTTP_TIMEOUT_MARGIN))
        .layer(CorsLayer::permissive())
}
