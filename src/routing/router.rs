//! # Router Module
//!
//! Builds the axum router: an unauthenticated `/health` probe, and a
//! catch-all route sending every other method and path through the proxy
//! pipeline. Wrapped in `tower-http`'s tracing layer.

use axum::{
    Router,
    routing::{any, get},
};
use tower_http::trace::TraceLayer;

use super::handlers::{handle_health, handle_proxy_request};
use crate::AppState;

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/", any(handle_proxy_request))
        .route("/{*path}", any(handle_proxy_request))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
// End-to-end tests for the router are in the tests module
