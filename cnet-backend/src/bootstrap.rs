//! Builds the shared runtime from configuration. Used by both binaries.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cnet_auth::{AesGcmCipher, AuthenticatorTrait, JwtAuthenticator, SecretCipher, StaticPrincipal};
use cnet_config::Config;
use cnet_db::{create_pool, run_migrations, DbConnectionConfig, SqlQueueStore, SqlStore};
use cnet_job_queue::JobQueueClient;
use cnet_jobs::{
    DryRunBackups, DryRunServiceActions, HttpServiceProbe, JobContext, JobKindValidator,
    LogNotifier, Notifier, ProxmoxClient, ServiceProbe, SmtpNotifier, SmtpSettings,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Everything the binaries share: persistence, queues and handler collaborators.
pub struct Runtime {
    pub store: Arc<SqlStore>,
    pub queue: JobQueueClient,
    pub cipher: Arc<dyn SecretCipher>,
    pub probe: Arc<dyn ServiceProbe>,
    pub jobs: Arc<JobContext>,
}

impl Runtime {
    pub fn app_state(&self, authenticator: Arc<dyn AuthenticatorTrait>) -> AppState {
        AppState::new(
            self.store.clone(),
            authenticator,
            self.queue.clone(),
            self.cipher.clone(),
            self.probe.clone(),
        )
    }
}

pub fn database_config_from_config(cfg: &Config) -> DbConnectionConfig {
    // an in-memory database exists per connection; keep exactly one alive
    if cfg.database.url.contains(":memory:") {
        return DbConnectionConfig::in_memory();
    }
    DbConnectionConfig::new(cfg.database.url.as_str())
        .with_max_connections(cfg.database.max_connections)
}

/// Parse host:port into a SocketAddr, with fallback to 0.0.0.0.
pub fn parse_bind_address(host: &str, port: u16) -> SocketAddr {
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .or_else(|_| host.parse::<SocketAddr>())
        .or_else(|_| host.parse::<Ipv6Addr>().map(|ip| SocketAddr::new(IpAddr::V6(ip), port)))
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)))
}

/// HS256 authenticator from `auth.jwt_secret`. The error is the reason the
/// server falls back to maintenance mode.
pub fn build_authenticator(cfg: &Config) -> Result<Arc<dyn AuthenticatorTrait>, String> {
    match cfg.auth.jwt_secret.as_deref() {
        Some(secret) if !secret.is_empty() => {
            Ok(Arc::new(JwtAuthenticator::new_hs256(secret.to_owned())))
        }
        _ => Err("no JWT configuration found: set auth.jwt_secret or CNET_JWT_SECRET".into()),
    }
}

fn operator_user_id(cfg: &Config) -> anyhow::Result<Option<Uuid>> {
    cfg.auth
        .operator_user_id
        .as_deref()
        .map(|raw| {
            Uuid::parse_str(raw.trim())
                .with_context(|| format!("auth.operator_user_id is not a uuid: {raw}"))
        })
        .transpose()
}

fn build_notifier(cfg: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    let n = &cfg.notifications;
    match n.smtp_host.as_deref().filter(|h| !h.trim().is_empty()) {
        Some(host) => {
            let notifier = SmtpNotifier::new(SmtpSettings {
                host: host.to_owned(),
                port: n.smtp_port,
                username: n.smtp_username.clone(),
                password: n.smtp_password.clone(),
                from: n.from_address.clone(),
                starttls: n.smtp_starttls,
            })
            .context("failed to configure smtp notifier")?;
            info!(host = %host, port = n.smtp_port, "smtp notifications enabled");
            Ok(Arc::new(notifier))
        }
        None => {
            warn!("no smtp host configured; notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Open and migrate the database and wire the shared queues and job context.
pub async fn build_runtime(cfg: &Config) -> anyhow::Result<Runtime> {
    let db_cfg = database_config_from_config(cfg);
    let pool = create_pool(&db_cfg).await.context("failed to create database pool")?;
    run_migrations(&pool).await.context("failed to apply database migrations")?;
    info!("database migrations applied");

    let store = Arc::new(SqlStore::new(pool.clone()));
    // the database is the queue; every process on it sees the same jobs
    let queue = JobQueueClient::with_store(Arc::new(SqlQueueStore::new(pool)))
        .with_validator(Arc::new(JobKindValidator));

    let cipher: Arc<dyn SecretCipher> = Arc::new(
        AesGcmCipher::new(cfg.encryption.password.clone().unwrap_or_default())
            .context("encryption.password (CNET_ENCRYPTION_PASSWORD) must be set")?,
    );
    let timeout = Duration::from_secs(cfg.probes.timeout_secs);
    let probe: Arc<dyn ServiceProbe> = Arc::new(HttpServiceProbe::new(timeout)?);

    let principal = operator_user_id(cfg)?;
    if principal.is_none() {
        warn!("auth.operator_user_id not set; backup jobs will be refused");
    }

    let jobs = Arc::new(JobContext {
        store: store.clone(),
        queue: queue.clone(),
        cipher: cipher.clone(),
        probe: probe.clone(),
        infra: Arc::new(ProxmoxClient::new(timeout)?),
        notifier: build_notifier(cfg)?,
        backups: Arc::new(DryRunBackups),
        actions: Arc::new(DryRunServiceActions),
        principal: Arc::new(StaticPrincipal::new(principal)),
        operator_email: cfg.notifications.operator_email.clone(),
    });

    Ok(Runtime {
        store,
        queue,
        cipher,
        probe,
        jobs,
    })
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use cnet_jobs::infra::{NodeMetrics, ProxmoxConnection};
    use cnet_jobs::notifier::{Email, NotifyError};
    use cnet_jobs::probe::ProbeError;
    use cnet_jobs::{InfrastructureClient, ProbeReport, ProbeTarget};

    pub struct NoInfra;

    #[cnet_job_queue::async_trait]
    impl InfrastructureClient for NoInfra {
        async fn list_nodes(&self, _conn: &ProxmoxConnection) -> Result<Vec<String>, ProbeError> {
            Ok(Vec::new())
        }

        async fn node_metrics(
            &self,
            _conn: &ProxmoxConnection,
            node: &str,
        ) -> Result<NodeMetrics, ProbeError> {
            Err(ProbeError::Response(format!("no node {node}")))
        }
    }

    pub struct AlwaysUp;

    #[cnet_job_queue::async_trait]
    impl ServiceProbe for AlwaysUp {
        async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
            Ok(ProbeReport {
                healthy: true,
                message: "ok".into(),
                response_time_ms: 1,
            })
        }
    }

    /// Takes a moment per message so shutdown has something to drain.
    pub struct SlowNotifier;

    #[cnet_job_queue::async_trait]
    impl Notifier for SlowNotifier {
        async fn send(&self, _email: &Email) -> Result<String, NotifyError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Uuid::new_v4().to_string())
        }
    }

    pub async fn test_context() -> Arc<JobContext> {
        test_context_with(JobQueueClient::new()).await
    }

    pub async fn test_context_with(queue: JobQueueClient) -> Arc<JobContext> {
        let pool = create_pool(&DbConnectionConfig::in_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(JobContext {
            store: Arc::new(SqlStore::new(pool)),
            queue: queue.with_validator(Arc::new(JobKindValidator)),
            cipher: Arc::new(AesGcmCipher::new("test-password").unwrap()),
            probe: Arc::new(AlwaysUp),
            infra: Arc::new(NoInfra),
            notifier: Arc::new(SlowNotifier),
            backups: Arc::new(DryRunBackups),
            actions: Arc::new(DryRunServiceActions),
            principal: Arc::new(StaticPrincipal::new(None)),
            operator_email: "admin@c-net.local".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_falls_back_to_any() {
        assert_eq!(
            parse_bind_address("127.0.0.1", 6000),
            SocketAddr::from(([127, 0, 0, 1], 6000))
        );
        assert_eq!(
            parse_bind_address("not an ip", 6000),
            SocketAddr::from(([0, 0, 0, 0], 6000))
        );
    }

    #[test]
    fn missing_secret_means_maintenance() {
        let cfg = Config::default();
        assert!(build_authenticator(&cfg).is_err());
    }

    #[test]
    fn operator_id_must_be_a_uuid() {
        let mut cfg = Config::default();
        cfg.auth.operator_user_id = Some("admin".into());
        assert!(operator_user_id(&cfg).is_err());

        let id = Uuid::new_v4();
        cfg.auth.operator_user_id = Some(id.to_string());
        assert_eq!(operator_user_id(&cfg).unwrap(), Some(id));
    }

    #[tokio::test]
    async fn runtime_builds_against_memory_database() {
        let mut cfg = Config::default();
        cfg.database.url = "sqlite::memory:".into();
        cfg.database.max_connections = 1;
        cfg.encryption.password = Some("pw".into());

        let runtime = build_runtime(&cfg).await.unwrap();
        assert_eq!(runtime.jobs.operator_email, "admin@c-net.local");
        assert_eq!(runtime.queue.all_counts().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn runtime_requires_an_encryption_password() {
        let mut cfg = Config::default();
        cfg.database.url = "sqlite::memory:".into();
        cfg.database.max_connections = 1;

        assert!(build_runtime(&cfg).await.is_err());
    }
}
