//! Brings up one worker per queue plus the recurring schedule, and tears
//! them down on shutdown.

use std::sync::Arc;
use std::time::Duration;

use cnet_job_queue::{JobExecutor, JobQueueError, QueueName, Worker, WorkerHandle, WorkerOptions};
use cnet_jobs::{register_scheduled_jobs, JobContext, JobDispatcher, JobError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker supervisor already initialized")]
    AlreadyInitialized,
    #[error("failed to register scheduled jobs: {0}")]
    Schedule(#[from] JobError),
    #[error("failed to recover orphaned jobs: {0}")]
    Queue(#[from] JobQueueError),
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub scheduler_enabled: bool,
}

impl SupervisorOptions {
    pub fn from_config(cfg: &cnet_config::WorkersConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            drain_timeout: Duration::from_secs(cfg.drain_timeout_secs),
            scheduler_enabled: cfg.scheduler_enabled,
        }
    }

    fn worker_options(&self, queue: QueueName) -> WorkerOptions {
        WorkerOptions {
            concurrency: queue.concurrency(),
            poll_interval: self.poll_interval,
            drain_timeout: self.drain_timeout,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&cnet_config::Config::default().workers)
    }
}

enum Phase {
    Idle,
    Running(Vec<WorkerHandle>),
    Stopped,
}

/// Owns the worker set for the lifetime of the process.
///
/// Exactly one process per database may run a supervisor: it owns the repeat
/// schedule and takes over jobs left active by its previous run.
/// [`initialize`](Self::initialize) succeeds once; [`shutdown`](Self::shutdown)
/// may be called any number of times.
pub struct WorkerSupervisor {
    ctx: Arc<JobContext>,
    options: SupervisorOptions,
    phase: Mutex<Phase>,
}

impl WorkerSupervisor {
    pub fn new(ctx: Arc<JobContext>, options: SupervisorOptions) -> Self {
        Self {
            ctx,
            options,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub async fn initialize(&self) -> Result<(), SupervisorError> {
        let mut phase = self.phase.lock().await;
        if !matches!(*phase, Phase::Idle) {
            return Err(SupervisorError::AlreadyInitialized);
        }

        if let Err(e) = self.ctx.queue.requeue_orphaned().await {
            *phase = Phase::Stopped;
            return Err(e.into());
        }

        if self.options.scheduler_enabled {
            match register_scheduled_jobs(&self.ctx.queue, self.ctx.store.as_ref()).await {
                Ok(summary) => info!(
                    metrics_schedules = summary.metrics_schedules,
                    health_check_key = %summary.health_check_key,
                    cleanup_key = %summary.cleanup_key,
                    "scheduled jobs registered"
                ),
                Err(e) => {
                    *phase = Phase::Stopped;
                    return Err(e.into());
                }
            }
        } else {
            warn!("scheduler disabled; only triggered jobs will run");
        }

        let executor: Arc<dyn JobExecutor> = Arc::new(JobDispatcher::new(self.ctx.clone()));
        let handles = QueueName::ALL
            .into_iter()
            .map(|queue| {
                let options = self.options.worker_options(queue);
                info!(queue = %queue, concurrency = options.concurrency, "starting worker");
                Worker::new(queue, self.ctx.queue.clone(), executor.clone(), options).spawn()
            })
            .collect();

        *phase = Phase::Running(handles);
        info!("worker supervisor initialized");
        Ok(())
    }

    /// Close every worker, waiting for in-flight jobs. A no-op after the first call.
    pub async fn shutdown(&self) {
        let mut phase = self.phase.lock().await;
        let handles = match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Running(handles) => handles,
            Phase::Idle | Phase::Stopped => return,
        };

        info!(workers = handles.len(), "shutting down workers");
        let mut closing = JoinSet::new();
        for mut handle in handles {
            closing.spawn(async move {
                handle.close().await;
                handle.queue()
            });
        }
        while let Some(result) = closing.join_next().await {
            match result {
                Ok(queue) => info!(queue = %queue, "worker closed"),
                Err(e) => error!(error = %e, "worker close task failed"),
            }
        }
        info!("worker supervisor stopped");
    }

    /// Wait for SIGINT or SIGTERM, then shut down.
    pub async fn run_until_signal(&self) {
        shutdown_signal().await;
        self.shutdown().await;
    }
}

/// Resolves on the first interrupt or terminate signal.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!(signal = "SIGINT", "shutdown signal"),
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown signal"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "unix signal handlers unavailable, waiting for ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal");
}
