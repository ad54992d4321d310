//! Domain records exchanged with the persistence gateway.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Home-lab services with stored credentials and health state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    PiHole,
    Plex,
    Minecraft,
    Nas,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::PiHole,
        ServiceKind::Plex,
        ServiceKind::Minecraft,
        ServiceKind::Nas,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PiHole => "pi-hole",
            Self::Plex => "plex",
            Self::Minecraft => "minecraft",
            Self::Nas => "nas",
        }
    }

    /// Human-readable name used in alerts.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::PiHole => "Pi-hole",
            Self::Plex => "Plex",
            Self::Minecraft => "Minecraft",
            Self::Nas => "NAS",
        }
    }

    /// Whether an API key must accompany a stored credential.
    #[inline]
    pub const fn requires_api_key(self) -> bool {
        !matches!(self, Self::Minecraft)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown service: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Up,
    Down,
    Degraded,
}

impl HealthState {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "degraded" => Ok(Self::Degraded),
            other => Err(format!("unknown health state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

/// Proxmox connection details owned by one user.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub proxmox_host: String,
    pub proxmox_user: String,
    #[serde(skip_serializing)]
    pub proxmox_token_encrypted: String,
    pub verify_ssl: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInfrastructureConfig {
    pub user_id: Uuid,
    pub proxmox_host: String,
    pub proxmox_user: String,
    pub proxmox_token_encrypted: String,
    pub verify_ssl: bool,
}

/// A stored service credential. The API key is only ever held encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service: ServiceKind,
    pub hostname: String,
    pub port: u16,
    pub api_key_encrypted: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewServiceCredential {
    pub user_id: Uuid,
    pub service: ServiceKind,
    pub hostname: String,
    pub port: u16,
    pub api_key_encrypted: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service: ServiceKind,
    pub status: HealthState,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub id: i64,
    pub node_id: String,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub network_tx: i64,
    pub network_rx: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetricsSnapshot {
    pub node_id: String,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub network_tx: i64,
    pub network_rx: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub changes: Option<Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLogEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub changes: Option<Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}
