use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnet_auth::{CipherError, SecretCipher, StaticPrincipal};
use cnet_db::{
    create_pool, run_migrations, AuditStatus, DbConnectionConfig, HealthState,
    NewInfrastructureConfig, NewMetricsSnapshot, NewServiceCredential, ServiceKind, SqlStore,
    Store,
};
use cnet_job_queue::{
    FailOutcome, Job, JobCounts, JobOptions, JobQueueClient, JobQueueError, JobRequest, JobState,
    MemoryQueueStore, QueueName, QueueStore, RepeatRegistration, RetryPolicy, Worker,
    WorkerOptions,
};
use cnet_jobs::infra::{NodeMetrics, ProxmoxConnection};
use cnet_jobs::kinds::{
    BackupPayload, BackupType, CleanupPayload, CleanupType, HealthCheckPayload,
    IntegrationAction, IntegrationPayload, MetricsPayload, Notification, NotificationPayload,
};
use cnet_jobs::notifier::{Email, NotifyError};
use cnet_jobs::probe::ProbeError;
use cnet_jobs::{
    backup, cleanup, health, integrations, metrics, notification, register_scheduled_jobs,
    DryRunBackups, DryRunServiceActions, InfrastructureClient, JobContext, JobDispatcher,
    JobError, JobKindValidator, Notifier, ProbeReport, ProbeTarget, ServiceProbe,
};
use serde_json::{json, Value};
use uuid::Uuid;

/// Stores secrets as-is.
struct PlainCipher;

impl SecretCipher for PlainCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        Ok(plaintext.to_owned())
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CipherError> {
        Ok(sealed.to_owned())
    }
}

/// Replays a fixed sequence of up/down answers.
#[derive(Default)]
struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
}

impl ScriptedProbe {
    fn push(&self, healthy: bool) {
        self.answers.lock().unwrap().push_back(healthy);
    }
}

#[async_trait]
impl ServiceProbe for ScriptedProbe {
    async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
        let healthy = self.answers.lock().unwrap().pop_front().unwrap_or(true);
        Ok(ProbeReport {
            healthy,
            message: if healthy { "ok".into() } else { "HTTP 500".into() },
            response_time_ms: 12,
        })
    }
}

/// Three nodes; the one named in `broken` cannot be read.
struct FakeProxmox {
    broken: &'static str,
}

#[async_trait]
impl InfrastructureClient for FakeProxmox {
    async fn list_nodes(&self, _conn: &ProxmoxConnection) -> Result<Vec<String>, ProbeError> {
        Ok(vec!["pve1".into(), "pve2".into(), "pve3".into()])
    }

    async fn node_metrics(
        &self,
        _conn: &ProxmoxConnection,
        node: &str,
    ) -> Result<NodeMetrics, ProbeError> {
        if node == self.broken {
            return Err(ProbeError::Request("connection reset".into()));
        }
        Ok(NodeMetrics {
            cpu_percent: 10.0,
            ram_percent: 40.0,
            disk_percent: 55.0,
            network_tx: 0,
            network_rx: 0,
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> Result<String, NotifyError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok("<test@c-net.local>".into())
    }
}

/// In-memory queue whose inserts can be switched off, as when the database is full.
#[derive(Default)]
struct FlakyQueueStore {
    inner: MemoryQueueStore,
    refuse_inserts: AtomicBool,
}

#[async_trait]
impl QueueStore for FlakyQueueStore {
    async fn insert(&self, job: Job) -> Result<String, JobQueueError> {
        if self.refuse_inserts.load(Ordering::SeqCst) {
            return Err(JobQueueError::Storage("database or disk is full".into()));
        }
        self.inner.insert(job).await
    }

    async fn register_repeat(
        &self,
        registration: RepeatRegistration,
        now: DateTime<Utc>,
    ) -> Result<String, JobQueueError> {
        self.inner.register_repeat(registration, now).await
    }

    async fn remove_repeat(&self, queue: QueueName, key: &str) -> Result<bool, JobQueueError> {
        self.inner.remove_repeat(queue, key).await
    }

    async fn claim(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<Job>, JobQueueError> {
        self.inner.claim(queue, now).await
    }

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        returnvalue: Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        self.inner.complete(queue, job_id, returnvalue, now).await
    }

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        reason: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, JobQueueError> {
        self.inner.fail(queue, job_id, reason, retryable, now).await
    }

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, JobQueueError> {
        self.inner.get(queue, job_id).await
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, JobQueueError> {
        self.inner.counts(queue).await
    }

    async fn next_due(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>, JobQueueError> {
        self.inner.next_due(queue).await
    }

    async fn requeue_active(&self) -> Result<usize, JobQueueError> {
        self.inner.requeue_active().await
    }
}

struct Harness {
    ctx: Arc<JobContext>,
    store: Arc<SqlStore>,
    probe: Arc<ScriptedProbe>,
    notifier: Arc<RecordingNotifier>,
    operator: Uuid,
}

async fn harness() -> Harness {
    harness_with(JobQueueClient::new()).await
}

async fn harness_with(queue: JobQueueClient) -> Harness {
    let pool = create_pool(&DbConnectionConfig::in_memory()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqlStore::new(pool));
    let probe = Arc::new(ScriptedProbe::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let operator = Uuid::new_v4();

    let ctx = Arc::new(JobContext {
        store: store.clone(),
        queue: queue.with_validator(Arc::new(JobKindValidator)),
        cipher: Arc::new(PlainCipher),
        probe: probe.clone(),
        infra: Arc::new(FakeProxmox { broken: "pve2" }),
        notifier: notifier.clone(),
        backups: Arc::new(DryRunBackups),
        actions: Arc::new(DryRunServiceActions),
        principal: Arc::new(StaticPrincipal::new(Some(operator))),
        operator_email: "admin@c-net.local".into(),
    });

    Harness {
        ctx,
        store,
        probe,
        notifier,
        operator,
    }
}

async fn add_credential(store: &SqlStore, user: Uuid, service: ServiceKind) -> Uuid {
    store
        .insert_credential(NewServiceCredential {
            user_id: user,
            service,
            hostname: "10.0.0.20".into(),
            port: 32400,
            api_key_encrypted: Some("plex-token".into()),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn alerts_only_on_up_to_down_transitions() {
    let h = harness().await;
    add_credential(&h.store, h.operator, ServiceKind::Plex).await;

    let payload = HealthCheckPayload {
        service: Some(ServiceKind::Plex),
    };
    let mut alerts = 0;
    for healthy in [true, false, false, false, true, false] {
        h.probe.push(healthy);
        let summary = health::check(&h.ctx, &payload).await.unwrap();
        if summary.results[0].alerted {
            alerts += 1;
        }
        // alert ids carry the previous check's millisecond
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(alerts, 2);
    let counts = h.ctx.queue.get_counts("notifications").await.unwrap();
    assert_eq!(counts.total(), 2);

    let status = h.store.get_service_status(ServiceKind::Plex).await.unwrap().unwrap();
    assert_eq!(status.status, HealthState::Down);
}

#[tokio::test]
async fn failed_alert_enqueue_is_retried_not_lost() {
    let queue_store = Arc::new(FlakyQueueStore::default());
    let h = harness_with(JobQueueClient::with_store(queue_store.clone())).await;
    add_credential(&h.store, h.operator, ServiceKind::Plex).await;
    let payload = HealthCheckPayload {
        service: Some(ServiceKind::Plex),
    };

    h.probe.push(true);
    health::check(&h.ctx, &payload).await.unwrap();
    let last_up = h.store.get_service_status(ServiceKind::Plex).await.unwrap().unwrap();

    // the alert cannot be queued, so the job fails and the status stays up
    queue_store.refuse_inserts.store(true, Ordering::SeqCst);
    h.probe.push(false);
    let err = health::check(&h.ctx, &payload).await.unwrap_err();
    assert!(matches!(err, JobError::Queue(JobQueueError::Storage(_))));
    let status = h.store.get_service_status(ServiceKind::Plex).await.unwrap().unwrap();
    assert_eq!(status.status, HealthState::Up);
    assert_eq!(h.ctx.queue.get_counts("notifications").await.unwrap().total(), 0);

    // the retry still sees the transition and alerts once
    queue_store.refuse_inserts.store(false, Ordering::SeqCst);
    h.probe.push(false);
    let summary = health::check(&h.ctx, &payload).await.unwrap();
    assert!(summary.results[0].alerted);
    let alert_id = format!("service-down:plex:{}", last_up.last_check.timestamp_millis());
    let alert = h.ctx.queue.get_job("notifications", &alert_id).await.unwrap();
    assert_eq!(alert.data["type"], "service-down");

    h.probe.push(false);
    let summary = health::check(&h.ctx, &payload).await.unwrap();
    assert!(!summary.results[0].alerted);
    assert_eq!(h.ctx.queue.get_counts("notifications").await.unwrap().total(), 1);
}

#[tokio::test]
async fn missing_credentials_mark_service_down_without_failing() {
    let h = harness().await;

    let summary = health::check(&h.ctx, &HealthCheckPayload::default()).await.unwrap();

    assert_eq!(summary.results.len(), 4);
    for result in &summary.results {
        assert_eq!(result.status, HealthState::Down);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Service credentials not configured")
        );
        assert!(!result.alerted);
    }
    assert_eq!(h.store.list_service_statuses().await.unwrap().len(), 4);
}

#[tokio::test]
async fn one_broken_node_does_not_stop_the_others() {
    let h = harness().await;
    h.store
        .upsert_infrastructure_config(NewInfrastructureConfig {
            user_id: h.operator,
            proxmox_host: "pve.lan".into(),
            proxmox_user: "root@pam!cnet".into(),
            proxmox_token_encrypted: "secret".into(),
            verify_ssl: false,
        })
        .await
        .unwrap();

    let summary = metrics::collect(&h.ctx, &MetricsPayload { user_id: h.operator })
        .await
        .unwrap();

    assert_eq!(
        (summary.nodes_processed, summary.successful, summary.failed),
        (3, 2, 1)
    );
    let latest = h.store.latest_metrics().await.unwrap();
    let mut nodes: Vec<_> = latest.iter().map(|m| m.node_id.as_str()).collect();
    nodes.sort_unstable();
    assert_eq!(nodes, ["pve1", "pve3"]);
}

#[tokio::test]
async fn metrics_without_configuration_fail_the_job() {
    let h = harness().await;

    let err = metrics::collect(&h.ctx, &MetricsPayload { user_id: Uuid::new_v4() })
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Configuration(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unauthorized_backup_is_audited_before_failing() {
    let h = harness().await;
    let intruder = Uuid::new_v4();

    let err = backup::run(
        &h.ctx,
        &BackupPayload {
            backup_type: BackupType::Minecraft,
            target: "survival".into(),
            user_id: intruder,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, JobError::Unauthorized(_)));
    assert!(!err.is_retryable());

    let logs = h.store.list_audit_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "BACKUP_FAILED");
    assert_eq!(logs[0].status, AuditStatus::Failed);
    assert_eq!(logs[0].user_id, Some(intruder));
    assert_eq!(logs[0].resource_id.as_deref(), Some("survival"));
}

#[tokio::test]
async fn unauthorized_backup_is_attempted_once() {
    let h = harness().await;
    let client = h.ctx.queue.clone();
    let options = JobOptions::default().with_retry(RetryPolicy {
        attempts: 3,
        backoff_base_ms: 5,
    });
    let enqueued = client
        .enqueue(
            JobRequest::new(
                "backups",
                "minecraft",
                json!({"type": "minecraft", "target": "survival", "userId": Uuid::new_v4()}),
            )
            .with_options(options),
        )
        .await
        .unwrap();

    let mut worker = Worker::new(
        QueueName::Backups,
        client.clone(),
        Arc::new(JobDispatcher::new(h.ctx.clone())),
        WorkerOptions {
            poll_interval: Duration::from_millis(10),
            drain_timeout: Duration::from_secs(2),
            ..WorkerOptions::for_queue(QueueName::Backups)
        },
    )
    .spawn();

    for _ in 0..300 {
        if client.get_job("backups", &enqueued.job_id).await.unwrap().state == JobState::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.close().await;

    let job = client.get_job("backups", &enqueued.job_id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 1);
    assert!(job
        .failed_reason
        .as_deref()
        .is_some_and(|r| r.starts_with("Unauthorized")));
}

#[tokio::test]
async fn authorised_backup_is_audited_as_created() {
    let h = harness().await;

    let outcome = backup::run(
        &h.ctx,
        &BackupPayload {
            backup_type: BackupType::Truenas,
            target: "tank/media".into(),
            user_id: h.operator,
        },
    )
    .await
    .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "TrueNAS snapshot created for tank/media");
    let logs = h.store.list_audit_logs(10).await.unwrap();
    assert_eq!(logs[0].action, "BACKUP_CREATED");
    assert_eq!(logs[0].status, AuditStatus::Success);
}

#[tokio::test]
async fn cleanup_keeps_rows_exactly_at_the_retention_boundary() {
    let h = harness().await;
    let now = Utc::now();
    for age in [
        chrono::Duration::days(30),
        chrono::Duration::days(30) + chrono::Duration::seconds(1),
    ] {
        h.store
            .insert_metrics_snapshot(&NewMetricsSnapshot {
                node_id: "pve1".into(),
                cpu_percent: 1.0,
                ram_percent: 1.0,
                disk_percent: 1.0,
                network_tx: 0,
                network_rx: 0,
                timestamp: now - age,
            })
            .await
            .unwrap();
    }

    let summary = cleanup::run_at(
        h.store.as_ref(),
        &CleanupPayload {
            cleanup_type: CleanupType::Metrics,
        },
        now,
    )
    .await
    .unwrap();

    assert_eq!(summary.results.metrics_deleted, Some(1));
    assert_eq!(summary.results.audit_logs_deleted, None);
    assert_eq!(h.store.latest_metrics().await.unwrap().len(), 1);
}

#[tokio::test]
async fn notification_defaults_to_operator_email() {
    let h = harness().await;

    let outcome = notification::send(
        &h.ctx,
        &NotificationPayload {
            notification: Notification::Custom {
                message: "Backups finished".into(),
            },
            recipient: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.recipient, "admin@c-net.local");
    assert_eq!(outcome.kind, "custom");
    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "C-Net Alert: Backups finished");
}

#[tokio::test]
async fn integration_without_service_id_fails_and_is_audited() {
    let h = harness().await;

    let err = integrations::run(
        &h.ctx,
        &IntegrationPayload {
            action: IntegrationAction::PlexLibraryScan,
            service_id: None,
            container_id: None,
            user_id: h.operator,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Service ID is required for Plex library scan");
    let logs = h.store.list_audit_logs(10).await.unwrap();
    assert_eq!(logs[0].status, AuditStatus::Failed);
    assert_eq!(logs[0].resource_id.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn plex_library_scan_uses_the_stored_credential() {
    let h = harness().await;
    let id = add_credential(&h.store, h.operator, ServiceKind::Plex).await;

    let outcome = integrations::run(
        &h.ctx,
        &IntegrationPayload {
            action: IntegrationAction::PlexLibraryScan,
            service_id: Some(id),
            container_id: None,
            user_id: h.operator,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.message, "Plex library scan triggered for 10.0.0.20");
    assert_eq!(outcome.details, json!({"hostname": "10.0.0.20", "port": 32400}));
}

#[tokio::test]
async fn pihole_update_with_a_plex_id_reports_missing_credentials() {
    let h = harness().await;
    let plex = add_credential(&h.store, h.operator, ServiceKind::Plex).await;

    let err = integrations::run(
        &h.ctx,
        &IntegrationPayload {
            action: IntegrationAction::PiHoleGravityUpdate,
            service_id: Some(plex),
            container_id: None,
            user_id: h.operator,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Pi-hole credentials not found");
}

#[tokio::test]
async fn scheduling_twice_keeps_one_schedule_per_key() {
    let h = harness().await;
    h.store
        .upsert_infrastructure_config(NewInfrastructureConfig {
            user_id: h.operator,
            proxmox_host: "pve.lan".into(),
            proxmox_user: "root@pam!cnet".into(),
            proxmox_token_encrypted: "secret".into(),
            verify_ssl: true,
        })
        .await
        .unwrap();

    let first = register_scheduled_jobs(&h.ctx.queue, h.store.as_ref()).await.unwrap();
    let second = register_scheduled_jobs(&h.ctx.queue, h.store.as_ref()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.metrics_schedules, 1);
    for queue in ["metrics", "health-checks", "cleanup"] {
        let counts = h.ctx.queue.get_counts(queue).await.unwrap();
        assert_eq!(counts.total(), 1, "queue {queue}");
    }
}

#[tokio::test]
async fn invalid_payload_is_rejected_at_enqueue() {
    let h = harness().await;

    let result = h
        .ctx
        .queue
        .enqueue(JobRequest::new("cleanup", "cleanup", json!({"type": "everything"})))
        .await;

    assert!(result.is_err());
    assert_eq!(h.ctx.queue.get_counts("cleanup").await.unwrap().total(), 0);
}
