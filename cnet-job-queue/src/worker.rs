//! Concurrency-bounded consumer for a single queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::client::JobQueueClient;
use crate::executor::{JobExecutor, JobFailure};
use crate::types::{FailOutcome, Job, QueueName};

/// Failure recorded for a job still running when the drain timeout expired.
const ABANDONED_REASON: &str = "worker shut down before the job finished";

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub concurrency: usize,
    /// Upper bound on how long an idle worker sleeps before looking again.
    /// Jobs enqueued by another process are only noticed by polling.
    pub poll_interval: Duration,
    /// How long `close` waits for in-flight jobs.
    pub drain_timeout: Duration,
}

impl WorkerOptions {
    /// Defaults for `queue`, using its fixed concurrency ceiling.
    pub fn for_queue(queue: QueueName) -> Self {
        Self {
            concurrency: queue.concurrency(),
            poll_interval: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Worker {
    queue: QueueName,
    client: JobQueueClient,
    executor: Arc<dyn JobExecutor>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        queue: QueueName,
        client: JobQueueClient,
        executor: Arc<dyn JobExecutor>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            client,
            executor,
            options,
        }
    }

    /// Start consuming on the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let queue = self.queue;
        let span = info_span!("worker", queue = %queue);
        let task = tokio::spawn(self.run(cancel.clone()).instrument(span));
        WorkerHandle {
            queue,
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let concurrency = self.options.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let notify = self.client.notifier(self.queue);
        let mut in_flight = JoinSet::new();
        // job id per in-flight task
        let mut running: HashMap<Id, String> = HashMap::new();
        info!(concurrency, "worker started");

        loop {
            while let Some(res) = in_flight.try_join_next_with_id() {
                forget_finished(&mut running, res);
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            // register interest before claiming so an enqueue in between is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claimed = match self.client.claim(self.queue).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, "failed to claim a job");
                    None
                }
            };
            match claimed {
                Some(job) => {
                    let job_id = job.id.clone();
                    let client = self.client.clone();
                    let executor = self.executor.clone();
                    let task = in_flight.spawn(
                        async move {
                            process(&client, executor, job).await;
                            drop(permit);
                        }
                        .in_current_span(),
                    );
                    running.insert(task.id(), job_id);
                }
                None => {
                    drop(permit);
                    let wait = self.idle_wait().await;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        if in_flight.is_empty() {
            info!("worker stopped");
            return;
        }
        info!(in_flight = in_flight.len(), "draining in-flight jobs");
        let drained = tokio::time::timeout(self.options.drain_timeout, async {
            while let Some(res) = in_flight.join_next_with_id().await {
                forget_finished(&mut running, res);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "drain timeout elapsed, abandoning in-flight jobs"
            );
            in_flight.abort_all();
            while let Some(res) = in_flight.join_next_with_id().await {
                let (task, cancelled) = match &res {
                    Ok((id, ())) => (*id, false),
                    Err(e) => (e.id(), e.is_cancelled()),
                };
                let Some(job_id) = running.remove(&task) else {
                    continue;
                };
                if cancelled {
                    self.settle_abandoned(&job_id).await;
                }
            }
        }
        info!("worker stopped");
    }

    /// An aborted job counts as a failed attempt so it is retried instead of
    /// staying active until the next restart.
    async fn settle_abandoned(&self, job_id: &str) {
        match self
            .client
            .fail(self.queue, job_id, ABANDONED_REASON, true)
            .await
        {
            Ok(outcome) => warn!(job_id, ?outcome, "abandoned in-flight job"),
            Err(e) => error!(job_id, error = %e, "failed to settle abandoned job"),
        }
    }

    /// Sleep until the next delayed job is due, capped at the poll interval.
    async fn idle_wait(&self) -> Duration {
        match self.client.next_due(self.queue).await {
            Ok(Some(at)) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.options.poll_interval),
            Ok(None) => self.options.poll_interval,
            Err(e) => {
                warn!(error = %e, "failed to read the next due time");
                self.options.poll_interval
            }
        }
    }
}

fn forget_finished(running: &mut HashMap<Id, String>, res: Result<(Id, ()), JoinError>) {
    match res {
        Ok((id, ())) => {
            running.remove(&id);
        }
        Err(e) => {
            running.remove(&e.id());
            error!(error = %e, "job task aborted");
        }
    }
}

/// Aborts the handler task when the task awaiting it is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn process(client: &JobQueueClient, executor: Arc<dyn JobExecutor>, job: Job) {
    let queue = job.queue;
    let job_id = job.id.clone();
    let job_name = job.name.clone();
    let attempt = job.attempts_made;

    // run in its own task so a panicking handler still settles the job
    let task = tokio::spawn(async move { executor.execute(&job).await });
    let _guard = AbortOnDrop(task.abort_handle());
    let result = task
        .await
        .unwrap_or_else(|e| Err(JobFailure::retryable(format!("job handler panicked: {e}"))));

    match result {
        Ok(value) => match client.complete(queue, &job_id, value).await {
            Ok(()) => info!(job_id = %job_id, job_name = %job_name, attempt, "job completed"),
            Err(e) => warn!(job_id = %job_id, job_name = %job_name, error = %e, "could not mark job completed"),
        },
        Err(failure) => {
            match client
                .fail(queue, &job_id, &failure.message, failure.retryable)
                .await
            {
                Ok(FailOutcome::Retrying { .. }) => {
                    warn!(job_id = %job_id, job_name = %job_name, attempt, error = %failure, "job failed, will retry");
                }
                Ok(FailOutcome::Failed { .. }) => {
                    error!(job_id = %job_id, job_name = %job_name, attempt, error = %failure, retryable = failure.retryable, "job failed permanently");
                }
                Err(e) => {
                    warn!(job_id = %job_id, job_name = %job_name, error = %e, "could not mark job failed");
                }
            }
        }
    }
}

/// Owner of a running worker.
pub struct WorkerHandle {
    queue: QueueName,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Stop claiming and wait for in-flight jobs to drain. Safe to call twice.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(queue = %self.queue, error = %e, "worker task ended abnormally");
            }
        }
    }
}
