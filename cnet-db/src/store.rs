//! The persistence gateway used by handlers and HTTP routes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AuditLogEntry, InfrastructureConfig, MetricsSnapshot, NewAuditLogEntry,
    NewInfrastructureConfig, NewMetricsSnapshot, NewServiceCredential, ServiceCredential,
    ServiceKind, ServiceStatus,
};
use crate::pool::DbPool;
use crate::queries::{
    audit_logs, infrastructure_configs, metrics_snapshots, service_credentials,
    service_statuses,
};
use crate::utils::{from_millis, to_millis};

/// Narrow query/insert/update interface over the relational store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_infrastructure_configs(&self) -> Result<Vec<InfrastructureConfig>, StoreError>;

    async fn find_infrastructure_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<InfrastructureConfig>, StoreError>;

    async fn upsert_infrastructure_config(
        &self,
        config: NewInfrastructureConfig,
    ) -> Result<InfrastructureConfig, StoreError>;

    /// The credential used for health checks of `service`.
    async fn find_credential_by_service(
        &self,
        service: ServiceKind,
    ) -> Result<Option<ServiceCredential>, StoreError>;

    async fn find_credential(
        &self,
        id: Uuid,
        service: ServiceKind,
    ) -> Result<Option<ServiceCredential>, StoreError>;

    async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<ServiceCredential>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the user already has one for the service.
    async fn insert_credential(
        &self,
        credential: NewServiceCredential,
    ) -> Result<ServiceCredential, StoreError>;

    async fn delete_credential(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    async fn get_service_status(
        &self,
        service: ServiceKind,
    ) -> Result<Option<ServiceStatus>, StoreError>;

    async fn upsert_service_status(&self, status: &ServiceStatus) -> Result<(), StoreError>;

    async fn list_service_statuses(&self) -> Result<Vec<ServiceStatus>, StoreError>;

    async fn insert_metrics_snapshot(&self, snapshot: &NewMetricsSnapshot)
        -> Result<i64, StoreError>;

    async fn latest_metrics(&self) -> Result<Vec<MetricsSnapshot>, StoreError>;

    /// Delete snapshots strictly older than `cutoff`.
    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn insert_audit_log(&self, entry: &NewAuditLogEntry) -> Result<i64, StoreError>;

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLogEntry>, StoreError>;

    /// Delete audit entries strictly older than `cutoff`.
    async fn delete_audit_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// [`Store`] backed by the sqlite pool.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: DbPool,
}

impl SqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn infra_from_row(
    row: infrastructure_configs::InfrastructureConfigRow,
) -> InfrastructureConfig {
    InfrastructureConfig {
        id: row.id,
        user_id: row.user_id,
        proxmox_host: row.proxmox_host,
        proxmox_user: row.proxmox_user,
        proxmox_token_encrypted: row.proxmox_token_encrypted,
        verify_ssl: row.verify_ssl,
        created_at: from_millis(row.created_at),
        updated_at: from_millis(row.updated_at),
    }
}

fn credential_from_row(
    row: service_credentials::ServiceCredentialRow,
) -> Result<ServiceCredential, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "service_credentials",
        reason,
    };
    Ok(ServiceCredential {
        id: row.id,
        user_id: row.user_id,
        service: row.service.parse().map_err(corrupt)?,
        hostname: row.hostname,
        port: u16::try_from(row.port).map_err(|e| corrupt(e.to_string()))?,
        api_key_encrypted: row.api_key_encrypted,
        created_at: from_millis(row.created_at),
    })
}

fn status_from_row(row: service_statuses::ServiceStatusRow) -> Result<ServiceStatus, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "service_statuses",
        reason,
    };
    Ok(ServiceStatus {
        service: row.service.parse().map_err(corrupt)?,
        status: row.status.parse().map_err(corrupt)?,
        last_check: from_millis(row.last_check),
        response_time_ms: row.response_time_ms,
        error_message: row.error_message,
    })
}

fn snapshot_from_row(row: metrics_snapshots::MetricsSnapshotRow) -> MetricsSnapshot {
    MetricsSnapshot {
        id: row.id,
        node_id: row.node_id,
        cpu_percent: row.cpu_percent,
        ram_percent: row.ram_percent,
        disk_percent: row.disk_percent,
        network_tx: row.network_tx,
        network_rx: row.network_rx,
        timestamp: from_millis(row.timestamp),
    }
}

fn audit_from_row(row: audit_logs::AuditLogRow) -> Result<AuditLogEntry, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "audit_logs",
        reason,
    };
    Ok(AuditLogEntry {
        id: row.id,
        user_id: row.user_id,
        action: row.action,
        resource_type: row.resource_type,
        resource_id: row.resource_id,
        changes: row
            .changes
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?,
        status: row.status.parse().map_err(corrupt)?,
        error_message: row.error_message,
        ip_address: row.ip_address,
        timestamp: from_millis(row.timestamp),
    })
}

#[async_trait]
impl Store for SqlStore {
    async fn list_infrastructure_configs(&self) -> Result<Vec<InfrastructureConfig>, StoreError> {
        let rows = infrastructure_configs::list_all(&self.pool).await?;
        Ok(rows.into_iter().map(infra_from_row).collect())
    }

    async fn find_infrastructure_config(
        &self,
        user_id: Uuid,
    ) -> Result<Option<InfrastructureConfig>, StoreError> {
        let row = infrastructure_configs::find_by_user_id(&self.pool, &user_id).await?;
        Ok(row.map(infra_from_row))
    }

    async fn upsert_infrastructure_config(
        &self,
        config: NewInfrastructureConfig,
    ) -> Result<InfrastructureConfig, StoreError> {
        let now = to_millis(Utc::now());
        let row = infrastructure_configs::InfrastructureConfigRow {
            id: Uuid::new_v4(),
            user_id: config.user_id,
            proxmox_host: config.proxmox_host,
            proxmox_user: config.proxmox_user,
            proxmox_token_encrypted: config.proxmox_token_encrypted,
            verify_ssl: config.verify_ssl,
            created_at: now,
            updated_at: now,
        };
        let stored = infrastructure_configs::upsert(&self.pool, &row).await?;
        Ok(infra_from_row(stored))
    }

    async fn find_credential_by_service(
        &self,
        service: ServiceKind,
    ) -> Result<Option<ServiceCredential>, StoreError> {
        service_credentials::find_first_by_service(&self.pool, service.as_str())
            .await?
            .map(credential_from_row)
            .transpose()
    }

    async fn find_credential(
        &self,
        id: Uuid,
        service: ServiceKind,
    ) -> Result<Option<ServiceCredential>, StoreError> {
        service_credentials::find_by_id_and_service(&self.pool, &id, service.as_str())
            .await?
            .map(credential_from_row)
            .transpose()
    }

    async fn list_credentials(&self, user_id: Uuid) -> Result<Vec<ServiceCredential>, StoreError> {
        service_credentials::list_by_user(&self.pool, &user_id)
            .await?
            .into_iter()
            .map(credential_from_row)
            .collect()
    }

    async fn insert_credential(
        &self,
        credential: NewServiceCredential,
    ) -> Result<ServiceCredential, StoreError> {
        let mut tx = self.pool.begin().await?;
        let existing = service_credentials::find_by_user_and_service(
            &mut *tx,
            &credential.user_id,
            credential.service.as_str(),
        )
        .await?;
        if existing.is_some() {
            return Err(StoreError::Conflict(format!(
                "Credentials for {} already exist",
                credential.service
            )));
        }

        let row = service_credentials::ServiceCredentialRow {
            id: Uuid::new_v4(),
            user_id: credential.user_id,
            service: credential.service.as_str().to_owned(),
            hostname: credential.hostname,
            port: i64::from(credential.port),
            api_key_encrypted: credential.api_key_encrypted,
            created_at: to_millis(Utc::now()),
        };
        service_credentials::insert(&mut *tx, &row).await?;
        tx.commit().await?;
        credential_from_row(row)
    }

    async fn delete_credential(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let affected = service_credentials::delete_for_user(&self.pool, &user_id, &id).await?;
        Ok(affected > 0)
    }

    async fn get_service_status(
        &self,
        service: ServiceKind,
    ) -> Result<Option<ServiceStatus>, StoreError> {
        service_statuses::find_by_service(&self.pool, service.as_str())
            .await?
            .map(status_from_row)
            .transpose()
    }

    async fn upsert_service_status(&self, status: &ServiceStatus) -> Result<(), StoreError> {
        let row = service_statuses::ServiceStatusRow {
            service: status.service.as_str().to_owned(),
            status: status.status.as_str().to_owned(),
            last_check: to_millis(status.last_check),
            response_time_ms: status.response_time_ms,
            error_message: status.error_message.clone(),
        };
        service_statuses::upsert(&self.pool, &row).await?;
        Ok(())
    }

    async fn list_service_statuses(&self) -> Result<Vec<ServiceStatus>, StoreError> {
        service_statuses::list_all(&self.pool)
            .await?
            .into_iter()
            .map(status_from_row)
            .collect()
    }

    async fn insert_metrics_snapshot(
        &self,
        snapshot: &NewMetricsSnapshot,
    ) -> Result<i64, StoreError> {
        let row = metrics_snapshots::MetricsSnapshotRow {
            id: 0,
            node_id: snapshot.node_id.clone(),
            cpu_percent: snapshot.cpu_percent,
            ram_percent: snapshot.ram_percent,
            disk_percent: snapshot.disk_percent,
            network_tx: snapshot.network_tx,
            network_rx: snapshot.network_rx,
            timestamp: to_millis(snapshot.timestamp),
        };
        Ok(metrics_snapshots::insert(&self.pool, &row).await?)
    }

    async fn latest_metrics(&self) -> Result<Vec<MetricsSnapshot>, StoreError> {
        let rows = metrics_snapshots::latest_per_node(&self.pool).await?;
        Ok(rows.into_iter().map(snapshot_from_row).collect())
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(metrics_snapshots::delete_older_than(&self.pool, to_millis(cutoff)).await?)
    }

    async fn insert_audit_log(&self, entry: &NewAuditLogEntry) -> Result<i64, StoreError> {
        let row = audit_logs::AuditLogRow {
            id: 0,
            user_id: entry.user_id,
            action: entry.action.clone(),
            resource_type: entry.resource_type.clone(),
            resource_id: entry.resource_id.clone(),
            changes: entry.changes.as_ref().map(|v| v.to_string()),
            status: entry.status.as_str().to_owned(),
            error_message: entry.error_message.clone(),
            ip_address: entry.ip_address.clone(),
            timestamp: to_millis(entry.timestamp),
        };
        Ok(audit_logs::insert(&self.pool, &row).await?)
    }

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLogEntry>, StoreError> {
        audit_logs::list_recent(&self.pool, limit)
            .await?
            .into_iter()
            .map(audit_from_row)
            .collect()
    }

    async fn delete_audit_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(audit_logs::delete_older_than(&self.pool, to_millis(cutoff)).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditStatus, HealthState};
    use crate::{create_pool, run_migrations, DbConnectionConfig};
    use chrono::Duration;
    use serde_json::json;

    async fn store() -> SqlStore {
        let pool = create_pool(&DbConnectionConfig::in_memory())
            .await
            .expect("pool");
        run_migrations(&pool).await.expect("migrate");
        SqlStore::new(pool)
    }

    fn credential(user: Uuid, service: ServiceKind) -> NewServiceCredential {
        NewServiceCredential {
            user_id: user,
            service,
            hostname: "10.0.0.5".into(),
            port: 80,
            api_key_encrypted: Some("salt:nonce:ct".into()),
        }
    }

    #[tokio::test]
    async fn one_credential_per_user_and_service() {
        let store = store().await;
        let user = Uuid::new_v4();
        store
            .insert_credential(credential(user, ServiceKind::Plex))
            .await
            .unwrap();
        let err = store
            .insert_credential(credential(user, ServiceKind::Plex))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // another user may hold the same service
        store
            .insert_credential(credential(Uuid::new_v4(), ServiceKind::Plex))
            .await
            .unwrap();
        assert_eq!(store.list_credentials(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn credential_lookup_is_service_scoped() {
        let store = store().await;
        let user = Uuid::new_v4();
        let pihole = store
            .insert_credential(credential(user, ServiceKind::PiHole))
            .await
            .unwrap();

        assert!(store
            .find_credential(pihole.id, ServiceKind::PiHole)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_credential(pihole.id, ServiceKind::Plex)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .find_credential_by_service(ServiceKind::PiHole)
                .await
                .unwrap()
                .map(|c| c.id),
            Some(pihole.id)
        );

        assert!(!store.delete_credential(Uuid::new_v4(), pihole.id).await.unwrap());
        assert!(store.delete_credential(user, pihole.id).await.unwrap());
    }

    #[tokio::test]
    async fn service_status_upserts_one_row() {
        let store = store().await;
        let mut status = ServiceStatus {
            service: ServiceKind::Nas,
            status: HealthState::Up,
            last_check: Utc::now(),
            response_time_ms: Some(12),
            error_message: None,
        };
        store.upsert_service_status(&status).await.unwrap();
        status.status = HealthState::Down;
        status.error_message = Some("timeout".into());
        store.upsert_service_status(&status).await.unwrap();

        let all = store.list_service_statuses().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, HealthState::Down);
        assert_eq!(all[0].error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn metrics_cutoff_is_exclusive() {
        let store = store().await;
        let now = Utc::now();
        let cutoff = now - Duration::days(30);
        for (node, at) in [
            ("at-cutoff", cutoff),
            ("past-cutoff", cutoff - Duration::seconds(1)),
            ("fresh", now),
        ] {
            store
                .insert_metrics_snapshot(&NewMetricsSnapshot {
                    node_id: node.into(),
                    cpu_percent: 1.0,
                    ram_percent: 2.0,
                    disk_percent: 3.0,
                    network_tx: 0,
                    network_rx: 0,
                    timestamp: at,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.delete_metrics_before(cutoff).await.unwrap(), 1);
        let mut left: Vec<String> = store
            .latest_metrics()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.node_id)
            .collect();
        left.sort();
        assert_eq!(left, vec!["at-cutoff", "fresh"]);
    }

    #[tokio::test]
    async fn audit_entries_round_trip_changes() {
        let store = store().await;
        let user = Uuid::new_v4();
        store
            .insert_audit_log(&NewAuditLogEntry {
                user_id: Some(user),
                action: "backup_minecraft".into(),
                resource_type: "backup".into(),
                resource_id: Some("world".into()),
                changes: Some(json!({"type": "minecraft"})),
                status: AuditStatus::Failed,
                error_message: Some("Unauthorized".into()),
                ip_address: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let logs = store.list_audit_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, AuditStatus::Failed);
        assert_eq!(logs[0].changes, Some(json!({"type": "minecraft"})));
        assert_eq!(logs[0].user_id, Some(user));
    }

    #[tokio::test]
    async fn infrastructure_config_is_one_per_user() {
        let store = store().await;
        let user = Uuid::new_v4();
        let first = store
            .upsert_infrastructure_config(NewInfrastructureConfig {
                user_id: user,
                proxmox_host: "pve.lan".into(),
                proxmox_user: "root@pam!cnet".into(),
                proxmox_token_encrypted: "a:b:c".into(),
                verify_ssl: false,
            })
            .await
            .unwrap();
        let second = store
            .upsert_infrastructure_config(NewInfrastructureConfig {
                user_id: user,
                proxmox_host: "pve2.lan".into(),
                proxmox_user: "root@pam!cnet".into(),
                proxmox_token_encrypted: "d:e:f".into(),
                verify_ssl: true,
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.proxmox_host, "pve2.lan");
        assert_eq!(store.list_infrastructure_configs().await.unwrap().len(), 1);
    }
}
