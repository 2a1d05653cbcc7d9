use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router`: ingestion API, queue status and the
/// rendered chart tree under `/charts`.
pub fn create_router(state: Arc<AppState>, charts_dir: &Path) -> Router {
    Router::new()
        // ── Ingestion ───────────────────────────────────────────
        .route("/api/statistics", post(handlers::statistics::collect))
        .route(
            "/api/statistics/urls",
            post(handlers::statistics::collect_urls),
        )
        .route(
            "/api/statistics/lookup",
            get(handlers::statistics::lookup),
        )
        // ── Introspection ───────────────────────────────────────
        .route("/api/queue", get(handlers::statistics::queue_status))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Serve rendered charts ───────────────────────────────
        .nest_service("/charts", ServeDir::new(charts_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
