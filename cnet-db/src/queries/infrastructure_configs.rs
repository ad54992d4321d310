use sqlx::Executor;
use uuid::Uuid;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InfrastructureConfigRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub proxmox_host: String,
    pub proxmox_user: String,
    pub proxmox_token_encrypted: String,
    pub verify_ssl: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

const COLUMNS: &str = "id, user_id, proxmox_host, proxmox_user, proxmox_token_encrypted, verify_ssl, created_at, updated_at";

pub async fn list_all<'e, E>(executor: E) -> Result<Vec<InfrastructureConfigRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM infrastructure_configs ORDER BY created_at"
    ))
    .fetch_all(executor)
    .await
}

pub async fn find_by_user_id<'e, E>(
    executor: E,
    user_id: &Uuid,
) -> Result<Option<InfrastructureConfigRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM infrastructure_configs WHERE user_id = ?"
    ))
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Insert or replace the user's single config, keeping its id and creation time.
pub async fn upsert<'e, E>(
    executor: E,
    row: &InfrastructureConfigRow,
) -> Result<InfrastructureConfigRow, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        r#"
        INSERT INTO infrastructure_configs ({COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            proxmox_host = excluded.proxmox_host,
            proxmox_user = excluded.proxmox_user,
            proxmox_token_encrypted = excluded.proxmox_token_encrypted,
            verify_ssl = excluded.verify_ssl,
            updated_at = excluded.updated_at
        RETURNING {COLUMNS}
        "#
    ))
    .bind(row.id)
    .bind(row.user_id)
    .bind(&row.proxmox_host)
    .bind(&row.proxmox_user)
    .bind(&row.proxmox_token_encrypted)
    .bind(row.verify_ssl)
    .bind(row.created_at)
    .bind(row.updated_at)
    .fetch_one(executor)
    .await
}
