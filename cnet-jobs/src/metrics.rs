//! Metrics Collector: one snapshot per Proxmox node.

use chrono::{DateTime, Utc};
use cnet_auth::decrypt_blocking;
use cnet_db::NewMetricsSnapshot;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::JobContext;
use crate::error::JobError;
use crate::infra::ProxmoxConnection;
use crate::kinds::MetricsPayload;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub success: bool,
    pub nodes_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Collect metrics for every node of the user's Proxmox host.
///
/// A node that cannot be read or stored is counted as failed; the job only
/// fails when the configuration, token or node list is unavailable.
pub async fn collect(ctx: &JobContext, payload: &MetricsPayload) -> Result<MetricsSummary, JobError> {
    let config = ctx
        .store
        .find_infrastructure_config(payload.user_id)
        .await?
        .ok_or_else(|| {
            JobError::Configuration(format!(
                "Proxmox configuration not found for user {}",
                payload.user_id
            ))
        })?;

    let token = decrypt_blocking(ctx.cipher.clone(), config.proxmox_token_encrypted).await?;
    let conn = ProxmoxConnection {
        host: config.proxmox_host,
        user: config.proxmox_user,
        token,
        verify_ssl: config.verify_ssl,
    };

    let nodes = ctx.infra.list_nodes(&conn).await?;
    let mut successful = 0;
    for node in &nodes {
        let stored = match ctx.infra.node_metrics(&conn, node).await {
            Ok(m) => ctx
                .store
                .insert_metrics_snapshot(&NewMetricsSnapshot {
                    node_id: node.clone(),
                    cpu_percent: m.cpu_percent,
                    ram_percent: m.ram_percent,
                    disk_percent: m.disk_percent,
                    network_tx: m.network_tx,
                    network_rx: m.network_rx,
                    timestamp: Utc::now(),
                })
                .await
                .map(|_| ())
                .map_err(JobError::from),
            Err(e) => Err(e.into()),
        };
        match stored {
            Ok(()) => successful += 1,
            Err(e) => warn!(node = %node, error = %e, "failed to collect node metrics"),
        }
    }

    let summary = MetricsSummary {
        success: true,
        nodes_processed: nodes.len(),
        successful,
        failed: nodes.len() - successful,
        timestamp: Utc::now(),
    };
    info!(
        user_id = %payload.user_id,
        nodes = summary.nodes_processed,
        failed = summary.failed,
        "metrics collected"
    );
    Ok(summary)
}
