use sqlx::Executor;
use uuid::Uuid;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceCredentialRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service: String,
    pub hostname: String,
    pub port: i64,
    pub api_key_encrypted: Option<String>,
    pub created_at: i64,
}

const COLUMNS: &str = "id, user_id, service, hostname, port, api_key_encrypted, created_at";

/// First credential stored for `service`, regardless of owner.
pub async fn find_first_by_service<'e, E>(
    executor: E,
    service: &str,
) -> Result<Option<ServiceCredentialRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM service_credentials WHERE service = ? ORDER BY created_at LIMIT 1"
    ))
    .bind(service)
    .fetch_optional(executor)
    .await
}

pub async fn find_by_id_and_service<'e, E>(
    executor: E,
    id: &Uuid,
    service: &str,
) -> Result<Option<ServiceCredentialRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM service_credentials WHERE id = ? AND service = ?"
    ))
    .bind(id)
    .bind(service)
    .fetch_optional(executor)
    .await
}

pub async fn find_by_user_and_service<'e, E>(
    executor: E,
    user_id: &Uuid,
    service: &str,
) -> Result<Option<ServiceCredentialRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM service_credentials WHERE user_id = ? AND service = ?"
    ))
    .bind(user_id)
    .bind(service)
    .fetch_optional(executor)
    .await
}

pub async fn list_by_user<'e, E>(
    executor: E,
    user_id: &Uuid,
) -> Result<Vec<ServiceCredentialRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM service_credentials WHERE user_id = ? ORDER BY service"
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await
}

pub async fn insert<'e, E>(executor: E, row: &ServiceCredentialRow) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query(&format!(
        "INSERT INTO service_credentials ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(row.id)
    .bind(row.user_id)
    .bind(&row.service)
    .bind(&row.hostname)
    .bind(row.port)
    .bind(&row.api_key_encrypted)
    .bind(row.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_for_user<'e, E>(
    executor: E,
    user_id: &Uuid,
    id: &Uuid,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query("DELETE FROM service_credentials WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
