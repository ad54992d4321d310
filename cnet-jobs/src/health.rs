//! Health Checker: probe each service, persist its status, alert on up to down.

use chrono::{DateTime, Utc};
use cnet_db::{HealthState, ServiceKind, ServiceStatus};
use cnet_job_queue::{JobOptions, JobRequest};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::context::JobContext;
use crate::error::JobError;
use crate::kinds::{job_names, HealthCheckPayload};

const NOT_CONFIGURED: &str = "Service credentials not configured";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service: ServiceKind,
    pub status: HealthState,
    pub response_time: Option<i64>,
    pub error_message: Option<String>,
    /// A service-down alert was enqueued for this observation.
    pub alerted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub success: bool,
    pub results: Vec<ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

pub async fn check(ctx: &JobContext, payload: &HealthCheckPayload) -> Result<HealthSummary, JobError> {
    let services: Vec<ServiceKind> = match payload.service {
        Some(s) => vec![s],
        None => ServiceKind::ALL.to_vec(),
    };

    let mut results = Vec::with_capacity(services.len());
    for service in services {
        results.push(check_one(ctx, service).await?);
    }

    Ok(HealthSummary {
        success: true,
        results,
        timestamp: Utc::now(),
    })
}

async fn check_one(ctx: &JobContext, service: ServiceKind) -> Result<ServiceHealth, JobError> {
    // read before the upsert so the transition is judged against the old value
    let previous = ctx.store.get_service_status(service).await?;

    let (status, response_time, error_message) =
        match ctx.store.find_credential_by_service(service).await? {
            None => (HealthState::Down, None, Some(NOT_CONFIGURED.to_owned())),
            Some(credential) => match ctx.probe_target(&credential).await {
                Err(e) => {
                    warn!(service = %service, error = %e, "stored api key is unusable");
                    (HealthState::Down, None, Some(e.to_string()))
                }
                Ok(target) => {
                    let report = ctx.probe.probe(&target).await?;
                    if report.healthy {
                        (HealthState::Up, Some(report.response_time_ms), None)
                    } else {
                        (
                            HealthState::Down,
                            Some(report.response_time_ms),
                            Some(report.message),
                        )
                    }
                }
            },
        };

    // Enqueue before the upsert: a failed enqueue keeps the old status for the
    // retry, and the id pins the alert to the previous check.
    let went_down = match previous.as_ref() {
        Some(prev) if prev.status == HealthState::Up && status != HealthState::Up => {
            let alert = json!({
                "type": "service-down",
                "service": service.as_str(),
                "message": format!("Service {} is now down", service.display_name()),
                "responseTime": response_time,
                "errorMessage": error_message,
            });
            let alert_id = format!(
                "service-down:{}:{}",
                service.as_str(),
                prev.last_check.timestamp_millis()
            );
            ctx.queue
                .enqueue(
                    JobRequest::new("notifications", job_names::SERVICE_DOWN, alert)
                        .with_options(JobOptions::default().with_job_id(alert_id)),
                )
                .await?;
            info!(service = %service, "service went down, alert enqueued");
            true
        }
        _ => false,
    };

    ctx.store
        .upsert_service_status(&ServiceStatus {
            service,
            status,
            last_check: Utc::now(),
            response_time_ms: response_time,
            error_message: error_message.clone(),
        })
        .await?;

    Ok(ServiceHealth {
        service,
        status,
        response_time,
        error_message,
        alerted: went_down,
    })
}
