//! Cleanup: bulk retention deletes for metrics and audit logs.

use chrono::{DateTime, Duration, Utc};
use cnet_db::Store;
use serde::Serialize;
use tracing::info;

use crate::error::JobError;
use crate::kinds::{CleanupPayload, CleanupType};

pub const METRICS_RETENTION_DAYS: i64 = 30;
pub const AUDIT_LOG_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCounts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_logs_deleted: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub success: bool,
    #[serde(rename = "type")]
    pub cleanup_type: CleanupType,
    pub results: CleanupCounts,
    pub timestamp: DateTime<Utc>,
}

pub async fn run(store: &dyn Store, payload: &CleanupPayload) -> Result<CleanupSummary, JobError> {
    run_at(store, payload, Utc::now()).await
}

/// Delete rows strictly older than each retention window measured from `now`.
pub async fn run_at(
    store: &dyn Store,
    payload: &CleanupPayload,
    now: DateTime<Utc>,
) -> Result<CleanupSummary, JobError> {
    let mut results = CleanupCounts::default();

    if payload.cleanup_type.includes_metrics() {
        let deleted = store
            .delete_metrics_before(now - Duration::days(METRICS_RETENTION_DAYS))
            .await?;
        info!(deleted, days = METRICS_RETENTION_DAYS, "deleted old metrics snapshots");
        results.metrics_deleted = Some(deleted);
    }

    if payload.cleanup_type.includes_audit_logs() {
        let deleted = store
            .delete_audit_logs_before(now - Duration::days(AUDIT_LOG_RETENTION_DAYS))
            .await?;
        info!(deleted, days = AUDIT_LOG_RETENTION_DAYS, "deleted old audit logs");
        results.audit_logs_deleted = Some(deleted);
    }

    Ok(CleanupSummary {
        success: true,
        cleanup_type: payload.cleanup_type,
        results,
        timestamp: now,
    })
}
