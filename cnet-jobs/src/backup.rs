//! Backup Runner: authorised, audited backups with one runner per type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnet_db::{AuditStatus, NewAuditLogEntry};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::context::JobContext;
use crate::error::JobError;
use crate::kinds::{BackupPayload, BackupType};

/// A durable artifact produced by a backup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupArtifact {
    pub message: String,
    pub details: Value,
}

/// Produces a backup of `target`. Errors carry a human-readable reason.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run(&self, backup_type: BackupType, target: &str) -> Result<BackupArtifact, String>;
}

/// Reports where an artifact would be written without touching storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBackups;

#[async_trait]
impl BackupRunner for DryRunBackups {
    async fn run(&self, backup_type: BackupType, target: &str) -> Result<BackupArtifact, String> {
        let stamp = Utc::now().timestamp_millis();
        Ok(match backup_type {
            BackupType::Minecraft => BackupArtifact {
                message: format!("Minecraft backup created for {target}"),
                details: json!({
                    "target": target,
                    "backupLocation": format!("/backups/minecraft/{target}-{stamp}"),
                }),
            },
            BackupType::Truenas => BackupArtifact {
                message: format!("TrueNAS snapshot created for {target}"),
                details: json!({
                    "target": target,
                    "snapshotName": format!("auto-{stamp}"),
                }),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub success: bool,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub target: String,
    pub message: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

fn audit_entry(
    payload: &BackupPayload,
    status: AuditStatus,
    changes: Value,
    error: Option<String>,
) -> NewAuditLogEntry {
    NewAuditLogEntry {
        user_id: Some(payload.user_id),
        action: match status {
            AuditStatus::Success => "BACKUP_CREATED".into(),
            AuditStatus::Failed => "BACKUP_FAILED".into(),
        },
        resource_type: "backup".into(),
        resource_id: Some(payload.target.clone()),
        changes: Some(changes),
        status,
        error_message: error,
        ip_address: None,
        timestamp: Utc::now(),
    }
}

pub async fn run(ctx: &JobContext, payload: &BackupPayload) -> Result<BackupOutcome, JobError> {
    let changes = json!({"type": payload.backup_type, "target": payload.target});

    if ctx.principal.current_principal().await != Some(payload.user_id) {
        let err = JobError::Unauthorized("User does not have access to this backup".into());
        ctx.audit(audit_entry(payload, AuditStatus::Failed, changes, Some(err.to_string())))
            .await;
        return Err(err);
    }

    match ctx.backups.run(payload.backup_type, &payload.target).await {
        Ok(artifact) => {
            let mut changes = changes;
            changes["result"] = json!({"success": true, "message": artifact.message, "details": artifact.details});
            ctx.audit(audit_entry(payload, AuditStatus::Success, changes, None))
                .await;
            info!(
                backup_type = payload.backup_type.as_str(),
                target = %payload.target,
                "backup completed"
            );
            Ok(BackupOutcome {
                success: true,
                backup_type: payload.backup_type,
                target: payload.target.clone(),
                message: artifact.message,
                details: artifact.details,
                timestamp: Utc::now(),
            })
        }
        Err(reason) => {
            let mut changes = changes;
            changes["result"] = json!({"success": false, "message": reason});
            ctx.audit(audit_entry(
                payload,
                AuditStatus::Failed,
                changes,
                Some(reason.clone()),
            ))
            .await;
            Err(JobError::ActionFailed(reason))
        }
    }
}
