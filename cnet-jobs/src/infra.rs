//! Proxmox API access used by metrics collection.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::probe::ProbeError;

/// Decrypted connection details for one user's Proxmox host.
#[derive(Debug, Clone)]
pub struct ProxmoxConnection {
    pub host: String,
    pub user: String,
    pub token: Zeroizing<String>,
    pub verify_ssl: bool,
}

impl ProxmoxConnection {
    /// `https://<host>:8006/api2/json` unless the host already carries a scheme.
    pub fn api_base(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/api2/json")
        } else {
            format!("https://{host}:8006/api2/json")
        }
    }

    fn authorization(&self) -> String {
        format!("PVEAPIToken={}!{}", self.user, self.token.as_str())
    }
}

/// Utilisation of one node, as percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMetrics {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub network_tx: i64,
    pub network_rx: i64,
}

#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    /// Names of the compute nodes behind `conn`.
    async fn list_nodes(&self, conn: &ProxmoxConnection) -> Result<Vec<String>, ProbeError>;

    async fn node_metrics(
        &self,
        conn: &ProxmoxConnection,
        node: &str,
    ) -> Result<NodeMetrics, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    node: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    used: f64,
    #[serde(default)]
    total: f64,
}

impl Usage {
    fn percent(&self) -> f64 {
        if self.total > 0.0 {
            self.used / self.total * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: Usage,
    #[serde(default)]
    rootfs: Usage,
}

/// Proxmox VE REST client.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    strict: reqwest::Client,
    lenient: reqwest::Client,
}

impl ProxmoxClient {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let build = |accept_invalid: bool| {
            reqwest::Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| ProbeError::Client(e.to_string()))
        };
        Ok(Self {
            strict: build(false)?,
            lenient: build(true)?,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        conn: &ProxmoxConnection,
        path: &str,
    ) -> Result<T, ProbeError> {
        let client = if conn.verify_ssl { &self.strict } else { &self.lenient };
        let response = client
            .get(format!("{}{path}", conn.api_base()))
            .header("Authorization", conn.authorization())
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Response(format!(
                "{path} returned status {}",
                status.as_u16()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Response(e.to_string()))?;
        let envelope: Envelope<T> =
            serde_json::from_value(body).map_err(|e| ProbeError::Response(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl InfrastructureClient for ProxmoxClient {
    async fn list_nodes(&self, conn: &ProxmoxConnection) -> Result<Vec<String>, ProbeError> {
        let nodes: Vec<NodeEntry> = self.get(conn, "/nodes").await?;
        Ok(nodes.into_iter().map(|n| n.node).collect())
    }

    async fn node_metrics(
        &self,
        conn: &ProxmoxConnection,
        node: &str,
    ) -> Result<NodeMetrics, ProbeError> {
        let status: NodeStatus = self.get(conn, &format!("/nodes/{node}/status")).await?;
        Ok(NodeMetrics {
            cpu_percent: (status.cpu * 100.0).round(),
            ram_percent: status.memory.percent().round(),
            disk_percent: status.rootfs.percent().round(),
            // not reported by the node status endpoint
            network_tx: 0,
            network_rx: 0,
        })
    }
}
