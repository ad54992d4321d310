use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    extract::Extension,
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::handlers;
use crate::state::AppState;

// request bodies are small JSON documents
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Build the axum router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/jobs/trigger", post(handlers::jobs::trigger::trigger))
        .route("/jobs/status", get(handlers::jobs::status::status))
        .route("/jobs/metrics", get(handlers::jobs::metrics::metrics))
        .route(
            "/services/credentials",
            get(handlers::credentials::list::list).post(handlers::credentials::create::create),
        )
        .route(
            "/services/credentials/test",
            post(handlers::credentials::test::test),
        )
        .route(
            "/services/credentials/{id}",
            delete(handlers::credentials::delete::delete),
        )
        .route("/services/status", get(handlers::services::status))
        .route(
            "/infrastructure/config",
            put(handlers::infrastructure::put_config),
        )
        .route("/metrics/current", get(handlers::metrics::current))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .layer(Extension(state));

    Router::new().nest("/api", router)
}

/// Router used when authentication is not configured: liveness answers,
/// everything else is unavailable.
pub fn maintenance_router(reason: String) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/ready",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        )
        .fallback(move || {
            let reason = reason.clone();
            async move {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": format!("service unavailable: {reason}") })),
                )
            }
        });
    Router::new().nest("/api", api)
}
