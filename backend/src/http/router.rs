//! Router configuration for the HTTP API.
//!
//! This module sets up all routes, middleware (CORS, compression, tracing),
//! and creates the axum router ready for serving.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;
use super::ws;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Devices and dashboards are served from other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/samples", post(handlers::create_sample))
        .route("/samples/latest", get(handlers::latest_sample))
        .route(
            "/samples/{id}",
            put(handlers::update_sample).delete(handlers::delete_sample),
        )
        .route("/scopes/{scope}/events", get(handlers::stream_scope_events));

    let heart_rate = Router::new()
        .route("/daily", get(handlers::get_daily))
        .route("/weekly", get(handlers::get_weekly))
        .route("/monthly", get(handlers::get_monthly));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/insertData", post(handlers::insert_data))
        .route("/maxHR", get(handlers::max_hr))
        .route("/ws", get(ws::websocket_handler))
        .nest("/v1", api_v1)
        .nest("/api/heart-rate", heart_rate)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
