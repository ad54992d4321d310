use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{rejection::QueryRejection, Extension, Query};
use axum::http::HeaderMap;
use axum::Json;
use cnet_job_queue::Job;
use serde_json::{json, Value};

use super::stats_payload;
use crate::{error::ApiError, state::AppState};

fn job_payload(job: &Job) -> Value {
    json!({
        "jobId": job.id,
        "queue": job.queue,
        "name": job.name,
        "state": job.state,
        "progress": job.progress,
        "attemptsMade": job.attempts_made,
        "data": job.data,
        "returnvalue": job.returnvalue,
        "failedReason": job.failed_reason,
        "timestamp": job.enqueued_at.timestamp_millis(),
        "processedOn": job.started_at.map(|t| t.timestamp_millis()),
        "finishedOn": job.finished_at.map(|t| t.timestamp_millis()),
    })
}

/// GET /jobs/status?queue=..&jobId=..
/// One job when `jobId` is given, otherwise the queue's counts.
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    crate::handlers::auth::require_user(&state, &headers).await?;

    let params = query.ok().map(|value| value.0).unwrap_or_default();
    let queue = params
        .get("queue")
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("queue parameter is required"))?;

    match params.get("jobId").filter(|id| !id.trim().is_empty()) {
        Some(job_id) => {
            let job = state.job_queue.get_job(queue, job_id).await?;
            Ok(Json(job_payload(&job)))
        }
        None => {
            let counts = state.job_queue.get_counts(queue).await?;
            Ok(Json(json!({
                "queue": queue,
                "stats": stats_payload(&counts),
            })))
        }
    }
}
