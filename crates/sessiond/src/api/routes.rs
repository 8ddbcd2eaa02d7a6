//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    // Unmatched paths and methods fall through to the 404 handler without
    // an auth check.
    let protected_routes = Router::new()
        .route("/api/start", post(handlers::start_session))
        .route("/api/restart", post(handlers::restart_session))
        .route("/api/terminate", post(handlers::terminate_session))
        .route("/api/delete", post(handlers::delete_session))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state);

    let public_routes = Router::new().route("/openapi.json", get(handlers::openapi));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::not_found)
        .layer(trace_layer)
}
