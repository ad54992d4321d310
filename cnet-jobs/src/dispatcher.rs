//! Routes a claimed job to its handler.

use std::sync::Arc;

use cnet_job_queue::{async_trait, Job, JobExecutor, JobFailure};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::context::JobContext;
use crate::error::JobError;
use crate::kinds::JobKind;
use crate::{backup, cleanup, health, integrations, metrics, notification};

/// [`JobExecutor`] shared by all six workers.
#[derive(Clone)]
pub struct JobDispatcher {
    ctx: Arc<JobContext>,
}

impl JobDispatcher {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, kind: &JobKind) -> Result<Value, JobError> {
        let ctx = self.ctx.as_ref();
        match kind {
            JobKind::CollectMetrics(p) => to_value(metrics::collect(ctx, p).await?),
            JobKind::CheckHealth(p) => to_value(health::check(ctx, p).await?),
            JobKind::RunBackup(p) => to_value(backup::run(ctx, p).await?),
            JobKind::Cleanup(p) => to_value(cleanup::run(ctx.store.as_ref(), p).await?),
            JobKind::Notify(p) => to_value(notification::send(ctx, p).await?),
            JobKind::Integration(p) => to_value(integrations::run(ctx, p).await?),
        }
    }
}

fn to_value<T: Serialize>(result: T) -> Result<Value, JobError> {
    serde_json::to_value(result).map_err(|e| JobError::InvalidPayload(e.to_string()))
}

#[async_trait]
impl JobExecutor for JobDispatcher {
    async fn execute(&self, job: &Job) -> Result<Value, JobFailure> {
        let kind = JobKind::parse(job.queue, &job.data)?;
        info!(
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempts_made,
            "executing {} job",
            job.queue
        );
        Ok(self.dispatch(&kind).await?)
    }
}
