use axum::http::HeaderMap;
use cnet_auth::AuthContext;
use tracing::debug;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// The raw `Authorization` header value, if present.
pub fn extract_auth_token(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())
}

/// Authenticate the request; anonymous callers yield an anonymous context.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let token = extract_auth_token(headers);
    let ctx = state.authenticator().authenticate(token).await?;
    debug!(user_id = ?ctx.user_id, "request authenticated");
    Ok(ctx)
}

/// Authenticate and require a user id.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    authenticate(state, headers)
        .await?
        .user_id
        .ok_or_else(ApiError::unauthorized)
}
