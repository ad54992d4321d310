//! Bounded-time reachability checks against home-lab services.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cnet_db::ServiceKind;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Response(String),
}

/// Where and how to reach one service.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub service: ServiceKind,
    pub hostname: String,
    pub port: u16,
    pub api_key: Option<Zeroizing<String>>,
}

impl ProbeTarget {
    fn base_url(&self) -> String {
        let scheme = if self.port == 443 { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.hostname, self.port)
    }
}

/// Outcome of one check. `healthy == false` is a handled "down" classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub healthy: bool,
    pub message: String,
    pub response_time_ms: i64,
}

#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, ProbeError>;
}

/// HTTP and TCP probe with per-service health semantics.
#[derive(Debug, Clone)]
pub struct HttpServiceProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpServiceProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    async fn check_pihole(&self, target: &ProbeTarget) -> Result<bool, String> {
        let mut request = self
            .client
            .get(format!("{}/admin/api.php?summaryRaw", target.base_url()));
        if let Some(key) = &target.api_key {
            request = request.query(&[("auth", key.as_str())]);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        match response.status() {
            StatusCode::OK => Ok(true),
            other => Err(format!("Pi-hole returned status {}", other.as_u16())),
        }
    }

    async fn check_plex(&self, target: &ProbeTarget) -> Result<bool, String> {
        let mut request = self.client.get(format!("{}/", target.base_url()));
        if let Some(key) = &target.api_key {
            request = request.header("X-Plex-Token", key.as_str());
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        // 401 still proves the server is up
        match response.status() {
            StatusCode::OK | StatusCode::UNAUTHORIZED => Ok(true),
            other => Err(format!("Plex returned status {}", other.as_u16())),
        }
    }

    async fn check_nas(&self, target: &ProbeTarget) -> Result<bool, String> {
        let mut request = self
            .client
            .get(format!("{}/api/v2.0/system/info", target.base_url()));
        if let Some(key) = &target.api_key {
            request = request.bearer_auth(key.as_str());
        }
        match request.send().await {
            Ok(response) => match response.status() {
                StatusCode::OK | StatusCode::UNAUTHORIZED => Ok(true),
                other => Err(format!("NAS returned status {}", other.as_u16())),
            },
            Err(api_err) => {
                // not every NAS speaks the TrueNAS API; plain reachability is enough
                debug!(hostname = %target.hostname, error = %api_err, "NAS API unreachable, trying root");
                self.client
                    .get(format!("{}/", target.base_url()))
                    .send()
                    .await
                    .map(|_| true)
                    .map_err(|_| api_err.to_string())
            }
        }
    }

    async fn check_minecraft(&self, target: &ProbeTarget) -> Result<bool, String> {
        let addr = (target.hostname.as_str(), target.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("connection timed out".into()),
        }
    }
}

#[async_trait]
impl ServiceProbe for HttpServiceProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
        let started = Instant::now();
        let outcome = match target.service {
            ServiceKind::PiHole => self.check_pihole(target).await,
            ServiceKind::Plex => self.check_plex(target).await,
            ServiceKind::Minecraft => self.check_minecraft(target).await,
            ServiceKind::Nas => self.check_nas(target).await,
        };
        let response_time_ms = started.elapsed().as_millis() as i64;
        let name = target.service.display_name();

        Ok(match outcome {
            Ok(_) => ProbeReport {
                healthy: true,
                message: format!("{name} connection successful"),
                response_time_ms,
            },
            Err(reason) => ProbeReport {
                healthy: false,
                message: format!("Failed to connect to {name}: {reason}"),
                response_time_ms,
            },
        })
    }
}
