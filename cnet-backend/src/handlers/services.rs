use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

/// GET /services/status
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    crate::handlers::auth::require_user(&state, &headers).await?;
    let services = state.store.list_service_statuses().await?;
    Ok(Json(json!({ "services": services })))
}
