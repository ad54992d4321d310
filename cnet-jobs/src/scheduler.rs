//! Recurring job registration, run once at worker start-up.

use std::time::Duration;

use cnet_db::Store;
use cnet_job_queue::{JobQueueClient, JobRequest, QueueName, Repeat};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::JobError;
use crate::kinds::job_names;

pub const METRICS_INTERVAL: Duration = Duration::from_secs(30);
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(120);
/// 02:00 every day, UTC.
pub const CLEANUP_CRON: &str = "0 2 * * *";

pub const HEALTH_CHECK_REPEAT_KEY: &str = "health-checks-repeat";
pub const CLEANUP_REPEAT_KEY: &str = "cleanup-daily-repeat";

pub fn metrics_repeat_key(user_id: Uuid) -> String {
    format!("metrics-collection-{user_id}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub metrics_schedules: usize,
    pub health_check_key: String,
    pub cleanup_key: String,
}

/// Register every recurring job. Safe to call again: keys are stable, so a
/// second call leaves one schedule per key.
pub async fn register_scheduled_jobs(
    client: &JobQueueClient,
    store: &dyn Store,
) -> Result<ScheduleSummary, JobError> {
    let configs = store.list_infrastructure_configs().await?;
    for config in &configs {
        let key = metrics_repeat_key(config.user_id);
        client
            .enqueue_repeating(
                JobRequest::new(
                    QueueName::Metrics.as_str(),
                    job_names::COLLECT_METRICS,
                    json!({"userId": config.user_id}),
                ),
                Repeat::every(METRICS_INTERVAL),
                &key,
            )
            .await?;
        info!(user_id = %config.user_id, key = %key, "scheduled metrics collection");
    }

    client
        .enqueue_repeating(
            JobRequest::new(
                QueueName::HealthChecks.as_str(),
                job_names::CHECK_ALL_SERVICES,
                json!({}),
            ),
            Repeat::every(HEALTH_CHECK_INTERVAL),
            HEALTH_CHECK_REPEAT_KEY,
        )
        .await?;
    info!(key = HEALTH_CHECK_REPEAT_KEY, "scheduled health checks");

    client
        .enqueue_repeating(
            JobRequest::new(
                QueueName::Cleanup.as_str(),
                job_names::CLEANUP_ALL,
                json!({"type": "all"}),
            ),
            Repeat::cron(CLEANUP_CRON),
            CLEANUP_REPEAT_KEY,
        )
        .await?;
    info!(key = CLEANUP_REPEAT_KEY, cron = CLEANUP_CRON, "scheduled daily cleanup");

    Ok(ScheduleSummary {
        metrics_schedules: configs.len(),
        health_check_key: HEALTH_CHECK_REPEAT_KEY.to_owned(),
        cleanup_key: CLEANUP_REPEAT_KEY.to_owned(),
    })
}
