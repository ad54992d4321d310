use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use cnet_auth::encrypt_blocking;
use cnet_db::{NewServiceCredential, ServiceKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use zeroize::Zeroizing;

use super::credential_payload;
use crate::validation::{ensure_valid, ValidationIssue};
use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBody {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// A checked credential request, the key still in plaintext.
pub(crate) struct ValidCredential {
    pub service: ServiceKind,
    pub hostname: String,
    pub port: u16,
    pub api_key: Option<Zeroizing<String>>,
}

impl CredentialBody {
    pub(crate) fn validate(self) -> Result<ValidCredential, ApiError> {
        let mut issues = Vec::new();

        let service = self.service.parse::<ServiceKind>();
        if service.is_err() {
            issues.push(ValidationIssue::new(
                "service",
                "invalid",
                "service must be one of pi-hole, plex, minecraft, nas",
            ));
        }
        let hostname = self.hostname.trim().to_owned();
        if hostname.is_empty() {
            issues.push(ValidationIssue::new("hostname", "required", "hostname is required"));
        }
        let port = u16::try_from(self.port).ok().filter(|p| *p > 0);
        if port.is_none() {
            issues.push(ValidationIssue::new(
                "port",
                "range",
                "port must be between 1 and 65535",
            ));
        }
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .map(Zeroizing::new);
        if let Ok(kind) = service {
            if kind.requires_api_key() && api_key.is_none() {
                issues.push(ValidationIssue::new(
                    "apiKey",
                    "required",
                    format!("apiKey is required for {kind}"),
                ));
            }
        }

        ensure_valid(issues)?;
        match (service, port) {
            (Ok(service), Some(port)) => Ok(ValidCredential {
                service,
                hostname,
                port,
                api_key,
            }),
            _ => Err(ApiError::bad_request("invalid credential")),
        }
    }
}

/// POST /services/credentials
/// Store a credential for the caller. The key is encrypted before it is persisted.
pub async fn create(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<CredentialBody>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user_id = crate::handlers::auth::require_user(&state, &headers).await?;
    let Json(body) = body.ok_or_else(|| ApiError::bad_request("request body is required"))?;
    let valid = body.validate()?;

    let api_key_encrypted = match valid.api_key {
        Some(key) => Some(encrypt_blocking(state.cipher.clone(), key).await?),
        None => None,
    };

    let credential = state
        .store
        .insert_credential(NewServiceCredential {
            user_id,
            service: valid.service,
            hostname: valid.hostname,
            port: valid.port,
            api_key_encrypted,
        })
        .await?;
    info!(user_id = %user_id, service = %credential.service, "service credential stored");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "credential": credential_payload(&credential),
        })),
    ))
}
