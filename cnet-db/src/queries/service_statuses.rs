use sqlx::Executor;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceStatusRow {
    pub service: String,
    pub status: String,
    pub last_check: i64,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
}

pub async fn find_by_service<'e, E>(
    executor: E,
    service: &str,
) -> Result<Option<ServiceStatusRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(
        "SELECT service, status, last_check, response_time_ms, error_message FROM service_statuses WHERE service = ?",
    )
    .bind(service)
    .fetch_optional(executor)
    .await
}

pub async fn list_all<'e, E>(executor: E) -> Result<Vec<ServiceStatusRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(
        "SELECT service, status, last_check, response_time_ms, error_message FROM service_statuses ORDER BY service",
    )
    .fetch_all(executor)
    .await
}

pub async fn upsert<'e, E>(executor: E, row: &ServiceStatusRow) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query(
        r#"
        INSERT INTO service_statuses (service, status, last_check, response_time_ms, error_message)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (service) DO UPDATE SET
            status = excluded.status,
            last_check = excluded.last_check,
            response_time_ms = excluded.response_time_ms,
            error_message = excluded.error_message
        "#,
    )
    .bind(&row.service)
    .bind(&row.status)
    .bind(row.last_check)
    .bind(row.response_time_ms)
    .bind(&row.error_message)
    .execute(executor)
    .await?;
    Ok(())
}
