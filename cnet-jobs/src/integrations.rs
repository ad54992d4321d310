//! Service Integrations: gravity updates, library scans and container restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnet_db::{AuditStatus, NewAuditLogEntry, ServiceKind};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::JobContext;
use crate::error::JobError;
use crate::kinds::{IntegrationAction, IntegrationPayload};
use crate::probe::ProbeTarget;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub message: String,
    pub details: Value,
}

/// Long-running operations against home-lab services.
#[async_trait]
pub trait ServiceActions: Send + Sync {
    async fn gravity_update(&self, pihole: &ProbeTarget) -> Result<ActionOutcome, String>;

    async fn library_scan(&self, plex: &ProbeTarget) -> Result<ActionOutcome, String>;

    async fn restart_container(&self, container_id: &str) -> Result<ActionOutcome, String>;
}

/// Acknowledges each action without contacting the service.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunServiceActions;

#[async_trait]
impl ServiceActions for DryRunServiceActions {
    async fn gravity_update(&self, pihole: &ProbeTarget) -> Result<ActionOutcome, String> {
        Ok(ActionOutcome {
            message: format!("Pi-hole gravity update triggered for {}", pihole.hostname),
            details: json!({"hostname": pihole.hostname, "port": pihole.port}),
        })
    }

    async fn library_scan(&self, plex: &ProbeTarget) -> Result<ActionOutcome, String> {
        Ok(ActionOutcome {
            message: format!("Plex library scan triggered for {}", plex.hostname),
            details: json!({"hostname": plex.hostname, "port": plex.port}),
        })
    }

    async fn restart_container(&self, container_id: &str) -> Result<ActionOutcome, String> {
        Ok(ActionOutcome {
            message: format!("Container {container_id} restart triggered"),
            details: json!({"containerId": container_id}),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationOutcome {
    pub success: bool,
    pub action: IntegrationAction,
    pub message: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Resolve the credential-backed target for a service action.
async fn resolve(
    ctx: &JobContext,
    service: ServiceKind,
    service_id: Option<Uuid>,
    action_label: &str,
) -> Result<Result<ProbeTarget, String>, JobError> {
    let Some(id) = service_id else {
        return Ok(Err(format!("Service ID is required for {action_label}")));
    };
    let Some(credential) = ctx.store.find_credential(id, service).await? else {
        return Ok(Err(format!(
            "{} credentials not found",
            service.display_name()
        )));
    };
    Ok(ctx.probe_target(&credential).await.map_err(|e| e.to_string()))
}

pub async fn run(
    ctx: &JobContext,
    payload: &IntegrationPayload,
) -> Result<IntegrationOutcome, JobError> {
    let result = match payload.action {
        IntegrationAction::PiHoleGravityUpdate => {
            match resolve(ctx, ServiceKind::PiHole, payload.service_id, "Pi-hole gravity update").await? {
                Ok(target) => ctx.actions.gravity_update(&target).await,
                Err(reason) => Err(reason),
            }
        }
        IntegrationAction::PlexLibraryScan => {
            match resolve(ctx, ServiceKind::Plex, payload.service_id, "Plex library scan").await? {
                Ok(target) => ctx.actions.library_scan(&target).await,
                Err(reason) => Err(reason),
            }
        }
        IntegrationAction::ContainerRestart => match payload.container_id.as_deref() {
            Some(id) if !id.trim().is_empty() => ctx.actions.restart_container(id).await,
            _ => Err("Container ID is required for restart".to_owned()),
        },
    };

    let (status, result_json, error_message) = match &result {
        Ok(outcome) => (
            AuditStatus::Success,
            json!({"success": true, "message": outcome.message, "details": outcome.details}),
            None,
        ),
        Err(reason) => (
            AuditStatus::Failed,
            json!({"success": false, "message": reason}),
            Some(reason.clone()),
        ),
    };
    let resource_id = payload
        .service_id
        .map(|id| id.to_string())
        .or_else(|| payload.container_id.clone())
        .unwrap_or_else(|| "unknown".into());

    ctx.audit(NewAuditLogEntry {
        user_id: Some(payload.user_id),
        action: "SERVICE_INTEGRATION".into(),
        resource_type: "service-integration".into(),
        resource_id: Some(resource_id),
        changes: Some(json!({
            "action": payload.action,
            "serviceId": payload.service_id,
            "containerId": payload.container_id,
            "result": result_json,
        })),
        status,
        error_message,
        ip_address: None,
        timestamp: Utc::now(),
    })
    .await;

    match result {
        Ok(outcome) => {
            info!(action = payload.action.as_str(), "service integration completed");
            Ok(IntegrationOutcome {
                success: true,
                action: payload.action,
                message: outcome.message,
                details: outcome.details,
                timestamp: Utc::now(),
            })
        }
        Err(reason) => {
            warn!(action = payload.action.as_str(), reason = %reason, "service integration failed");
            Err(JobError::ActionFailed(reason))
        }
    }
}
