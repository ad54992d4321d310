use sqlx::Executor;

use crate::DbBackend;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueJobRow {
    pub queue: String,
    pub id: String,
    pub state: String,
    pub body: String,
    pub run_at: i64,
    pub enqueued_at: i64,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueRepeatRow {
    pub queue: String,
    pub key: String,
    pub body: String,
}

const JOB_COLUMNS: &str = "queue, id, state, body, run_at, enqueued_at, finished_at, updated_at";

/// Insert unless the (queue, id) pair exists. Returns true if a row was written.
pub async fn insert_job_if_absent<'e, E>(executor: E, row: &QueueJobRow) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO queue_jobs (queue, id, state, body, run_at, enqueued_at, finished_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (queue, id) DO NOTHING
        "#,
    )
    .bind(&row.queue)
    .bind(&row.id)
    .bind(&row.state)
    .bind(&row.body)
    .bind(row.run_at)
    .bind(row.enqueued_at)
    .bind(row.finished_at)
    .bind(row.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find_job<'e, E>(executor: E, queue: &str, id: &str) -> Result<Option<QueueJobRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE queue = ? AND id = ?"
    ))
    .bind(queue)
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Oldest waiting or delayed job due at `now`.
pub async fn next_claimable<'e, E>(executor: E, queue: &str, now: i64) -> Result<Option<QueueJobRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM queue_jobs
        WHERE queue = ? AND state IN ('waiting', 'delayed') AND run_at <= ?
        ORDER BY run_at, enqueued_at, rowid
        LIMIT 1
        "#
    ))
    .bind(queue)
    .bind(now)
    .fetch_optional(executor)
    .await
}

/// Overwrite a job row only if it still holds `expected_state` and
/// `expected_body`. Returns false when another writer got there first.
pub async fn replace_job<'e, E>(
    executor: E,
    row: &QueueJobRow,
    expected_state: &str,
    expected_body: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        r#"
        UPDATE queue_jobs
        SET state = ?, body = ?, run_at = ?, finished_at = ?, updated_at = ?
        WHERE queue = ? AND id = ? AND state = ? AND body = ?
        "#,
    )
    .bind(&row.state)
    .bind(&row.body)
    .bind(row.run_at)
    .bind(row.finished_at)
    .bind(row.updated_at)
    .bind(&row.queue)
    .bind(&row.id)
    .bind(expected_state)
    .bind(expected_body)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete_job<'e, E>(executor: E, queue: &str, id: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query("DELETE FROM queue_jobs WHERE queue = ? AND id = ?")
        .bind(queue)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Delete a job that has not started yet.
pub async fn delete_pending_job<'e, E>(executor: E, queue: &str, id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        "DELETE FROM queue_jobs WHERE queue = ? AND id = ? AND state IN ('waiting', 'delayed')",
    )
    .bind(queue)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_jobs_in_state<'e, E>(executor: E, state: &str) -> Result<Vec<QueueJobRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE state = ? ORDER BY enqueued_at"
    ))
    .bind(state)
    .fetch_all(executor)
    .await
}

/// (state, count) pairs for one queue. Delayed jobs already due at `now`
/// count as waiting.
pub async fn count_by_state<'e, E>(executor: E, queue: &str, now: i64) -> Result<Vec<(String, i64)>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as(
        r#"
        SELECT CASE WHEN state = 'delayed' AND run_at <= ? THEN 'waiting' ELSE state END AS bucket,
               COUNT(*)
        FROM queue_jobs
        WHERE queue = ?
        GROUP BY bucket
        "#,
    )
    .bind(now)
    .bind(queue)
    .fetch_all(executor)
    .await
}

pub async fn next_due<'e, E>(executor: E, queue: &str) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_scalar(
        "SELECT MIN(run_at) FROM queue_jobs WHERE queue = ? AND state IN ('waiting', 'delayed')",
    )
    .bind(queue)
    .fetch_one(executor)
    .await
}

/// Drop finished jobs in `state` that ended before `cutoff`, then keep at
/// most `max_count` of the rest, newest first.
pub async fn prune_finished<'e, E>(
    executor: E,
    queue: &str,
    state: &str,
    cutoff: i64,
    max_count: Option<i64>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    // LIMIT -1 is unbounded in sqlite
    let result = sqlx::query(
        r#"
        DELETE FROM queue_jobs
        WHERE queue = ? AND state = ?
          AND (finished_at < ? OR id NOT IN (
              SELECT id FROM queue_jobs
              WHERE queue = ? AND state = ?
              ORDER BY finished_at DESC, rowid DESC
              LIMIT ?
          ))
        "#,
    )
    .bind(queue)
    .bind(state)
    .bind(cutoff)
    .bind(queue)
    .bind(state)
    .bind(max_count.unwrap_or(-1))
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Insert unless the key is registered. Returns true if a row was written.
pub async fn insert_repeat_if_absent<'e, E>(executor: E, row: &QueueRepeatRow) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO queue_repeats (queue, key, body) VALUES (?, ?, ?)
        ON CONFLICT (queue, key) DO NOTHING
        "#,
    )
    .bind(&row.queue)
    .bind(&row.key)
    .bind(&row.body)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find_repeat<'e, E>(executor: E, queue: &str, key: &str) -> Result<Option<QueueRepeatRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as("SELECT queue, key, body FROM queue_repeats WHERE queue = ? AND key = ?")
        .bind(queue)
        .bind(key)
        .fetch_optional(executor)
        .await
}

/// Overwrite a registration only if its body is still `expected_body`.
pub async fn replace_repeat<'e, E>(
    executor: E,
    row: &QueueRepeatRow,
    expected_body: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    let result = sqlx::query(
        "UPDATE queue_repeats SET body = ? WHERE queue = ? AND key = ? AND body = ?",
    )
    .bind(&row.body)
    .bind(&row.queue)
    .bind(&row.key)
    .bind(expected_body)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete_repeat<'e, E>(executor: E, queue: &str, key: &str) -> Result<Option<QueueRepeatRow>, sqlx::Error>
where
    E: Executor<'e, Database = DbBackend>,
{
    sqlx::query_as("DELETE FROM queue_repeats WHERE queue = ? AND key = ? RETURNING queue, key, body")
        .bind(queue)
        .bind(key)
        .fetch_optional(executor)
        .await
}
