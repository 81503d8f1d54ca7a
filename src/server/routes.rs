//! Router configuration for the ingestion gateway.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
///
/// Uploads have no body size limit.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            post(handlers::upload_card).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/status", get(handlers::api_status))
        .route("/:card_id", get(handlers::get_card))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
