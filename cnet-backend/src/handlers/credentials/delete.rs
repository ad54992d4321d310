use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// DELETE /services/credentials/{id}
pub async fn delete(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = crate::handlers::auth::require_user(&state, &headers).await?;
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::bad_request("id must be a uuid"))?;

    if !state.store.delete_credential(user_id, id).await? {
        return Err(ApiError::not_found(format!("credential {id}")));
    }
    Ok(Json(json!({ "success": true })))
}
