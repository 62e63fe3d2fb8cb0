use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{downloads, handlers, middleware::metrics_middleware, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health, config and scheduler status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Downloads
        .route(
            "/downloads",
            post(downloads::create_download).get(downloads::list_downloads),
        )
        .route(
            "/downloads/{id}",
            get(downloads::get_download).delete(downloads::delete_download),
        )
        .route("/downloads/{id}/retry", post(downloads::retry_download))
        .route("/downloads/{id}/cancel", post(downloads::cancel_download));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
