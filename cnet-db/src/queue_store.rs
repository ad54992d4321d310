//! Sqlite-backed job queues shared by every process on the same database.
//!
//! Each job and repeat registration is stored as a JSON body next to the
//! columns the queue filters on. Every state change is a compare-and-set
//! against the body that was read, so two workers racing for the same job
//! see exactly one winner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnet_job_queue::{
    FailOutcome, Job, JobCounts, JobQueueError, JobState, QueueName, QueueStore,
    RepeatRegistration, RetentionPolicy,
};
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::pool::DbPool;
use crate::queries::queue_jobs::{self, QueueJobRow, QueueRepeatRow};
use crate::utils::{from_millis, to_millis};

/// Give up on a claim after losing this many races in a row; the worker polls again.
const CLAIM_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct SqlQueueStore {
    pool: DbPool,
    retention: RetentionPolicy,
}

impl SqlQueueStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_retention(pool, RetentionPolicy::default())
    }

    pub fn with_retention(pool: DbPool, retention: RetentionPolicy) -> Self {
        Self { pool, retention }
    }

    async fn prune(&self, queue: QueueName, now: DateTime<Utc>) -> Result<(), JobQueueError> {
        let completed = queue_jobs::prune_finished(
            &self.pool,
            queue.as_str(),
            "completed",
            to_millis(self.retention.completed_cutoff(now)),
            self.retention.completed_max_count.map(count_limit),
        )
        .await
        .map_err(storage_err)?;
        let failed = queue_jobs::prune_finished(
            &self.pool,
            queue.as_str(),
            "failed",
            to_millis(self.retention.failed_cutoff(now)),
            self.retention.failed_max_count.map(count_limit),
        )
        .await
        .map_err(storage_err)?;
        if completed + failed > 0 {
            debug!(queue = %queue, completed, failed, "pruned finished jobs");
        }
        Ok(())
    }

    /// Read an active job and apply `transition`, failing if the job is not active
    /// or another writer changed it in the meantime.
    async fn finish<T>(
        &self,
        queue: QueueName,
        job_id: &str,
        now: DateTime<Utc>,
        transition: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, JobQueueError> {
        let not_found = || JobQueueError::NotFound {
            queue: queue.to_string(),
            job_id: job_id.to_owned(),
        };
        let row = queue_jobs::find_job(&self.pool, queue.as_str(), job_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(not_found)?;
        let mut job = decode_job(&row)?;
        if job.state != JobState::Active {
            return Err(not_found());
        }

        let outcome = transition(&mut job);
        let replaced = queue_jobs::replace_job(&self.pool, &job_row(&job, now)?, &row.state, &row.body)
            .await
            .map_err(storage_err)?;
        if !replaced {
            return Err(not_found());
        }
        Ok(outcome)
    }
}

fn storage_err(e: impl std::fmt::Display) -> JobQueueError {
    JobQueueError::Storage(e.to_string())
}

fn count_limit(max: usize) -> i64 {
    i64::try_from(max).unwrap_or(i64::MAX)
}

fn job_row(job: &Job, now: DateTime<Utc>) -> Result<QueueJobRow, JobQueueError> {
    Ok(QueueJobRow {
        queue: job.queue.as_str().to_owned(),
        id: job.id.clone(),
        state: job.state.to_string(),
        body: serde_json::to_string(job).map_err(storage_err)?,
        run_at: to_millis(job.run_at),
        enqueued_at: to_millis(job.enqueued_at),
        finished_at: job.finished_at.map(to_millis),
        updated_at: to_millis(now),
    })
}

fn decode_job(row: &QueueJobRow) -> Result<Job, JobQueueError> {
    serde_json::from_str(&row.body).map_err(|e| {
        storage_err(format!("unreadable job {}/{}: {e}", row.queue, row.id))
    })
}

fn repeat_row(registration: &RepeatRegistration) -> Result<QueueRepeatRow, JobQueueError> {
    Ok(QueueRepeatRow {
        queue: registration.queue.as_str().to_owned(),
        key: registration.key.clone(),
        body: serde_json::to_string(registration).map_err(storage_err)?,
    })
}

fn decode_repeat(row: &QueueRepeatRow) -> Result<RepeatRegistration, JobQueueError> {
    serde_json::from_str(&row.body).map_err(|e| {
        storage_err(format!("unreadable repeat {}/{}: {e}", row.queue, row.key))
    })
}

/// Schedule the occurrence after `claimed` if it is the registration's pending one.
async fn advance_repeat(
    conn: &mut SqliteConnection,
    claimed: &Job,
    key: &str,
    now: DateTime<Utc>,
) -> Result<(), JobQueueError> {
    let Some(row) = queue_jobs::find_repeat(&mut *conn, claimed.queue.as_str(), key)
        .await
        .map_err(storage_err)?
    else {
        return Ok(());
    };
    let registration = decode_repeat(&row)?;
    // Retries of an older occurrence do not move the schedule.
    if registration.pending_id() != claimed.id {
        return Ok(());
    }

    let next = registration.advance(now)?;
    queue_jobs::insert_job_if_absent(&mut *conn, &job_row(&next.occurrence(now), now)?)
        .await
        .map_err(storage_err)?;
    queue_jobs::replace_repeat(&mut *conn, &repeat_row(&next)?, &row.body)
        .await
        .map_err(storage_err)?;
    Ok(())
}

#[async_trait]
impl QueueStore for SqlQueueStore {
    async fn insert(&self, job: Job) -> Result<String, JobQueueError> {
        let row = job_row(&job, job.enqueued_at)?;
        queue_jobs::insert_job_if_absent(&self.pool, &row)
            .await
            .map_err(storage_err)?;
        Ok(job.id)
    }

    async fn register_repeat(
        &self,
        registration: RepeatRegistration,
        now: DateTime<Utc>,
    ) -> Result<String, JobQueueError> {
        let queue = registration.queue.as_str();
        let row = repeat_row(&registration)?;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        if !queue_jobs::insert_repeat_if_absent(&mut *tx, &row)
            .await
            .map_err(storage_err)?
        {
            let existing_row = queue_jobs::find_repeat(&mut *tx, queue, &registration.key)
                .await
                .map_err(storage_err)?
                .ok_or_else(|| storage_err(format!("repeat {queue}/{} vanished", registration.key)))?;
            match decode_repeat(&existing_row) {
                Ok(existing) if existing.same_schedule(&registration) => {
                    tx.rollback().await.map_err(storage_err)?;
                    return Ok(existing.pending_id());
                }
                Ok(existing) => {
                    queue_jobs::delete_pending_job(&mut *tx, queue, &existing.pending_id())
                        .await
                        .map_err(storage_err)?;
                }
                Err(e) => warn!(queue, repeat_key = %registration.key, error = %e, "replacing unreadable repeat registration"),
            }
            if !queue_jobs::replace_repeat(&mut *tx, &row, &existing_row.body)
                .await
                .map_err(storage_err)?
            {
                return Err(storage_err(format!(
                    "repeat {queue}/{} changed during registration",
                    registration.key
                )));
            }
        }

        let occurrence = registration.occurrence(now);
        queue_jobs::insert_job_if_absent(&mut *tx, &job_row(&occurrence, now)?)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(occurrence.id)
    }

    async fn remove_repeat(&self, queue: QueueName, key: &str) -> Result<bool, JobQueueError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let Some(row) = queue_jobs::delete_repeat(&mut *tx, queue.as_str(), key)
            .await
            .map_err(storage_err)?
        else {
            return Ok(false);
        };
        match decode_repeat(&row) {
            Ok(registration) => {
                queue_jobs::delete_pending_job(&mut *tx, queue.as_str(), &registration.pending_id())
                    .await
                    .map_err(storage_err)?;
            }
            Err(e) => warn!(queue = %queue, repeat_key = key, error = %e, "removed unreadable repeat registration"),
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(true)
    }

    async fn claim(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<Job>, JobQueueError> {
        for _ in 0..CLAIM_ATTEMPTS {
            let Some(row) = queue_jobs::next_claimable(&self.pool, queue.as_str(), to_millis(now))
                .await
                .map_err(storage_err)?
            else {
                return Ok(None);
            };
            let mut job = match decode_job(&row) {
                Ok(job) => job,
                Err(e) => {
                    warn!(queue = %queue, job_id = %row.id, error = %e, "dropping unreadable job");
                    queue_jobs::delete_job(&self.pool, queue.as_str(), &row.id)
                        .await
                        .map_err(storage_err)?;
                    continue;
                }
            };
            job.start_attempt(now);

            let mut tx = self.pool.begin().await.map_err(storage_err)?;
            if !queue_jobs::replace_job(&mut *tx, &job_row(&job, now)?, &row.state, &row.body)
                .await
                .map_err(storage_err)?
            {
                // another worker leased it first
                tx.rollback().await.map_err(storage_err)?;
                continue;
            }
            if let Some(key) = job.repeat_key.as_deref() {
                match advance_repeat(&mut *tx, &job, key, now).await {
                    Ok(()) => {}
                    Err(JobQueueError::InvalidSchedule(e)) => {
                        tracing::error!(queue = %queue, repeat_key = key, error = %e, "failed to schedule next occurrence");
                    }
                    Err(e) => return Err(e),
                }
            }
            tx.commit().await.map_err(storage_err)?;
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        returnvalue: Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        self.finish(queue, job_id, now, |job| job.complete(returnvalue, now))
            .await?;
        self.prune(queue, now).await
    }

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        reason: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, JobQueueError> {
        let outcome = self
            .finish(queue, job_id, now, |job| job.record_failure(reason, retryable, now))
            .await?;
        if matches!(outcome, FailOutcome::Failed { .. }) {
            self.prune(queue, now).await?;
        }
        Ok(outcome)
    }

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, JobQueueError> {
        queue_jobs::find_job(&self.pool, queue.as_str(), job_id)
            .await
            .map_err(storage_err)?
            .map(|row| decode_job(&row))
            .transpose()
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, JobQueueError> {
        let rows = queue_jobs::count_by_state(&self.pool, queue.as_str(), to_millis(Utc::now()))
            .await
            .map_err(storage_err)?;
        let mut counts = JobCounts::default();
        for (state, n) in rows {
            let n = usize::try_from(n).unwrap_or(0);
            match state.as_str() {
                "waiting" => counts.waiting += n,
                "active" => counts.active += n,
                "completed" => counts.completed += n,
                "failed" => counts.failed += n,
                "delayed" => counts.delayed += n,
                other => warn!(queue = %queue, state = other, "ignoring jobs in unknown state"),
            }
        }
        Ok(counts)
    }

    async fn next_due(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>, JobQueueError> {
        Ok(queue_jobs::next_due(&self.pool, queue.as_str())
            .await
            .map_err(storage_err)?
            .map(from_millis))
    }

    async fn requeue_active(&self) -> Result<usize, JobQueueError> {
        let rows = queue_jobs::list_jobs_in_state(&self.pool, "active")
            .await
            .map_err(storage_err)?;
        let now = Utc::now();
        let mut requeued = 0;
        for row in rows {
            let mut job = match decode_job(&row) {
                Ok(job) => job,
                Err(e) => {
                    warn!(queue = %row.queue, job_id = %row.id, error = %e, "skipping unreadable active job");
                    continue;
                }
            };
            job.requeue();
            if queue_jobs::replace_job(&self.pool, &job_row(&job, now)?, &row.state, &row.body)
                .await
                .map_err(storage_err)?
            {
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
