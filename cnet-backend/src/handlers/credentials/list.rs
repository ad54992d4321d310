use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use super::credential_payload;
use crate::{error::ApiError, state::AppState};

/// GET /services/credentials
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = crate::handlers::auth::require_user(&state, &headers).await?;

    let items: Vec<Value> = state
        .store
        .list_credentials(user_id)
        .await?
        .iter()
        .map(credential_payload)
        .collect();

    Ok(Json(json!({ "credentials": items })))
}
