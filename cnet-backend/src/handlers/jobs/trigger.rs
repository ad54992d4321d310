use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use cnet_job_queue::JobRequest;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::validation::{ensure_valid, ValidationIssue};
use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerJobBody {
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// POST /jobs/trigger
/// Enqueue one job. `data.userId` defaults to the caller.
pub async fn trigger(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<TriggerJobBody>>,
) -> Result<Json<Value>, ApiError> {
    let user_id = crate::handlers::auth::require_user(&state, &headers).await?;
    let Json(body) = body.ok_or_else(|| ApiError::bad_request("request body is required"))?;

    let mut issues = Vec::new();
    if body.queue.trim().is_empty() {
        issues.push(ValidationIssue::new("queue", "required", "queue is required"));
    }
    if body.job_name.trim().is_empty() {
        issues.push(ValidationIssue::new("jobName", "required", "jobName is required"));
    }
    let mut data = match body.data {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            issues.push(ValidationIssue::new("data", "type", "data must be an object"));
            Map::new()
        }
    };
    ensure_valid(issues)?;

    data.entry("userId").or_insert_with(|| json!(user_id));

    let result = state
        .job_queue
        .enqueue(JobRequest::new(
            body.queue.as_str(),
            body.job_name.as_str(),
            Value::Object(data),
        ))
        .await?;
    info!(
        queue = %result.queue,
        job_id = %result.job_id,
        job_name = %body.job_name,
        user_id = %user_id,
        "job triggered"
    );

    Ok(Json(json!({
        "success": true,
        "jobId": result.job_id,
        "queue": result.queue,
        "jobName": body.job_name,
        "message": "Job queued successfully",
    })))
}
