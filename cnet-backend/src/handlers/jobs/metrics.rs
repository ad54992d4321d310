use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};

use super::stats_payload;
use crate::{error::ApiError, state::AppState};

/// GET /jobs/metrics
/// Counts for every queue.
pub async fn metrics(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    crate::handlers::auth::require_user(&state, &headers).await?;

    let queues: Map<String, Value> = state
        .job_queue
        .all_counts()
        .await?
        .iter()
        .map(|(name, counts)| (name.to_string(), stats_payload(counts)))
        .collect();

    Ok(Json(json!({
        "queues": queues,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
