use sqlx::Executor;
use uuid::Uuid;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub changes: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: i64,
}

pub async fn insert<'e, E>(executor: E, row: &AuditLogRow) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, resource_type, resource_id, changes, status, error_message, ip_address, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.user_id)
    .bind(&row.action)
    .bind(&row.resource_type)
    .bind(&row.resource_id)
    .bind(&row.changes)
    .bind(&row.status)
    .bind(&row.error_message)
    .bind(&row.ip_address)
    .bind(row.timestamp)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest first.
pub async fn list_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<AuditLogRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(
        r#"
        SELECT id, user_id, action, resource_type, resource_id, changes, status, error_message, ip_address, timestamp
        FROM audit_logs
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Delete rows strictly older than `cutoff_ms`.
pub async fn delete_older_than<'e, E>(executor: E, cutoff_ms: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query("DELETE FROM audit_logs WHERE timestamp < ?")
        .bind(cutoff_ms)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
