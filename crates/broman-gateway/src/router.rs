use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/ping", get(api::ping))
        .route("/api/chat", post(api::chat))
        .route("/api/forecast", post(api::forecast))
        .route("/api/structured", post(api::structured))
        .route("/api/echo", get(api::echo))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
