use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

/// GET /metrics/current
/// Latest snapshot per node.
pub async fn current(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    crate::handlers::auth::require_user(&state, &headers).await?;
    let nodes = state.store.latest_metrics().await?;
    Ok(Json(json!({ "nodes": nodes })))
}
