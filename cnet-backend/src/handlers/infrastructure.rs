use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use cnet_db::NewInfrastructureConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::validation::{ensure_valid, ValidationIssue};
use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureBody {
    #[serde(default)]
    pub proxmox_host: String,
    #[serde(default)]
    pub proxmox_user: String,
    #[serde(default)]
    pub proxmox_token: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

/// PUT /infrastructure/config
/// Create or replace the caller's Proxmox connection. The token is stored encrypted.
pub async fn put_config(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<InfrastructureBody>>,
) -> Result<Json<Value>, ApiError> {
    let user_id = crate::handlers::auth::require_user(&state, &headers).await?;
    let Json(body) = body.ok_or_else(|| ApiError::bad_request("request body is required"))?;

    let mut issues = Vec::new();
    for (field, value) in [
        ("proxmoxHost", &body.proxmox_host),
        ("proxmoxUser", &body.proxmox_user),
        ("proxmoxToken", &body.proxmox_token),
    ] {
        if value.trim().is_empty() {
            issues.push(ValidationIssue::new(field, "required", format!("{field} is required")));
        }
    }
    ensure_valid(issues)?;

    let token = zeroize::Zeroizing::new(body.proxmox_token);
    let proxmox_token_encrypted = cnet_auth::encrypt_blocking(state.cipher.clone(), token).await?;
    let config = state
        .store
        .upsert_infrastructure_config(NewInfrastructureConfig {
            user_id,
            proxmox_host: body.proxmox_host.trim().to_owned(),
            proxmox_user: body.proxmox_user.trim().to_owned(),
            proxmox_token_encrypted,
            verify_ssl: body.verify_ssl,
        })
        .await?;
    info!(user_id = %user_id, host = %config.proxmox_host, "infrastructure config saved");

    Ok(Json(json!({ "success": true, "config": config })))
}
