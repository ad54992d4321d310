//! The closed set of job kinds and their typed payloads.

use cnet_db::ServiceKind;
use cnet_job_queue::{PayloadValidator, QueueName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobError;

/// Job names used by the scheduler and by alerting.
pub mod job_names {
    pub const COLLECT_METRICS: &str = "collect-metrics";
    pub const CHECK_ALL_SERVICES: &str = "check-all-services";
    pub const CLEANUP_ALL: &str = "cleanup-all";
    pub const SERVICE_DOWN: &str = "service-down";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPayload {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPayload {
    #[serde(default)]
    pub service: Option<ServiceKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Minecraft,
    Truenas,
}

impl BackupType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minecraft => "minecraft",
            Self::Truenas => "truenas",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub target: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupType {
    Metrics,
    AuditLogs,
    All,
}

impl CleanupType {
    pub const fn includes_metrics(self) -> bool {
        matches!(self, Self::Metrics | Self::All)
    }

    pub const fn includes_audit_logs(self) -> bool {
        matches!(self, Self::AuditLogs | Self::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
    #[serde(rename = "type")]
    pub cleanup_type: CleanupType,
}

/// Message-specific fields of a notification, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Notification {
    ServiceDown {
        #[serde(default)]
        service: Option<String>,
        message: String,
        #[serde(default)]
        response_time: Option<i64>,
        #[serde(default)]
        error_message: Option<String>,
    },
    DiskUsage {
        disk_usage_percent: f64,
        message: String,
    },
    Custom {
        message: String,
    },
}

impl Notification {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceDown { .. } => "service-down",
            Self::DiskUsage { .. } => "disk-usage",
            Self::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(flatten)]
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationAction {
    PiHoleGravityUpdate,
    PlexLibraryScan,
    ContainerRestart,
}

impl IntegrationAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PiHoleGravityUpdate => "pi-hole-gravity-update",
            Self::PlexLibraryScan => "plex-library-scan",
            Self::ContainerRestart => "container-restart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationPayload {
    pub action: IntegrationAction,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub container_id: Option<String>,
    pub user_id: Uuid,
}

/// A job decoded into its strongly typed form. The queue decides the kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    CollectMetrics(MetricsPayload),
    CheckHealth(HealthCheckPayload),
    RunBackup(BackupPayload),
    Cleanup(CleanupPayload),
    Notify(NotificationPayload),
    Integration(IntegrationPayload),
}

impl JobKind {
    pub fn parse(queue: QueueName, data: &Value) -> Result<Self, JobError> {
        fn decode<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, JobError> {
            serde_json::from_value(data.clone()).map_err(|e| JobError::InvalidPayload(e.to_string()))
        }

        Ok(match queue {
            QueueName::Metrics => Self::CollectMetrics(decode(data)?),
            QueueName::HealthChecks => Self::CheckHealth(decode(data)?),
            QueueName::Backups => Self::RunBackup(decode(data)?),
            QueueName::Cleanup => Self::Cleanup(decode(data)?),
            QueueName::Notifications => Self::Notify(decode(data)?),
            QueueName::ServiceIntegrations => Self::Integration(decode(data)?),
        })
    }

    pub const fn queue(&self) -> QueueName {
        match self {
            Self::CollectMetrics(_) => QueueName::Metrics,
            Self::CheckHealth(_) => QueueName::HealthChecks,
            Self::RunBackup(_) => QueueName::Backups,
            Self::Cleanup(_) => QueueName::Cleanup,
            Self::Notify(_) => QueueName::Notifications,
            Self::Integration(_) => QueueName::ServiceIntegrations,
        }
    }
}

/// Rejects payloads that do not decode into the queue's job kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobKindValidator;

impl PayloadValidator for JobKindValidator {
    fn validate(&self, queue: QueueName, _job_name: &str, data: &Value) -> Result<(), String> {
        JobKind::parse(queue, data).map(|_| ()).map_err(|e| match e {
            JobError::InvalidPayload(reason) => reason,
            other => other.to_string(),
        })
    }
}
