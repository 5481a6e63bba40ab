//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Proxy pool
        .route("/proxies", get(handlers::proxy::list_proxies))
        .route("/proxies/available", get(handlers::proxy::available))
        .route("/proxies/refresh", post(handlers::proxy::refresh))
        // Debug fetch
        .route("/fetch", post(handlers::fetch::fetch))
}
