use sqlx::Executor;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricsSnapshotRow {
    pub id: i64,
    pub node_id: String,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub network_tx: i64,
    pub network_rx: i64,
    pub timestamp: i64,
}

pub async fn insert<'e, E>(executor: E, row: &MetricsSnapshotRow) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO metrics_snapshots (node_id, cpu_percent, ram_percent, disk_percent, network_tx, network_rx, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.node_id)
    .bind(row.cpu_percent)
    .bind(row.ram_percent)
    .bind(row.disk_percent)
    .bind(row.network_tx)
    .bind(row.network_rx)
    .bind(row.timestamp)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent snapshot per node.
pub async fn latest_per_node<'e, E>(executor: E) -> Result<Vec<MetricsSnapshotRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(
        r#"
        SELECT m.id, m.node_id, m.cpu_percent, m.ram_percent, m.disk_percent, m.network_tx, m.network_rx, m.timestamp
        FROM metrics_snapshots m
        WHERE m.id = (
            SELECT id FROM metrics_snapshots
            WHERE node_id = m.node_id
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
        )
        ORDER BY m.node_id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Delete rows strictly older than `cutoff_ms`.
pub async fn delete_older_than<'e, E>(executor: E, cutoff_ms: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query("DELETE FROM metrics_snapshots WHERE timestamp < ?")
        .bind(cutoff_ms)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
