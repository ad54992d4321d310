//! Queue registry shared by producers and workers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::JobQueueError;
use crate::executor::PayloadValidator;
use crate::store::{MemoryQueueStore, QueueStore};
use crate::types::{
    EnqueueResult, FailOutcome, Job, JobCounts, JobRequest, QueueName, Repeat,
    RepeatRegistration, RetentionPolicy,
};

/// Interface for enqueuing jobs and inspecting queues.
///
/// Built once at startup and cloned into every component that produces or
/// consumes jobs. The client itself holds no job state: everything lives in
/// its [`QueueStore`], so clients in different processes that share a store
/// share the queues.
#[derive(Clone)]
pub struct JobQueueClient {
    store: Arc<dyn QueueStore>,
    notifiers: Arc<HashMap<QueueName, Arc<Notify>>>,
    validator: Option<Arc<dyn PayloadValidator>>,
}

impl fmt::Debug for JobQueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueueClient")
            .field("queues", &self.notifiers.keys().collect::<Vec<_>>())
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for JobQueueClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueueClient {
    /// A client over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::default())
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self::with_store(Arc::new(MemoryQueueStore::with_retention(retention)))
    }

    pub fn with_store(store: Arc<dyn QueueStore>) -> Self {
        let notifiers = QueueName::ALL
            .into_iter()
            .map(|name| (name, Arc::new(Notify::new())))
            .collect();
        Self {
            store,
            notifiers: Arc::new(notifiers),
            validator: None,
        }
    }

    /// Reject payloads `validator` refuses before they are stored.
    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Put jobs a previous worker process left active back in line.
    ///
    /// Only the process that owns the workers may call this: a job another
    /// live process is running would be handed out twice.
    pub async fn requeue_orphaned(&self) -> Result<usize, JobQueueError> {
        let requeued = self.store.requeue_active().await?;
        if requeued > 0 {
            info!(requeued, "orphaned jobs returned to waiting");
            for notify in self.notifiers.values() {
                notify.notify_one();
            }
        }
        Ok(requeued)
    }

    /// Enqueue a job for asynchronous processing.
    ///
    /// Nothing is stored unless the store accepts the job, so an `Err` never
    /// leaves a runnable job behind.
    pub async fn enqueue(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        let queue: QueueName = request.queue.parse()?;
        self.validate(queue, &request.job_name, &request.data)?;

        let job = Job::from_options(queue, &request.job_name, request.data, &request.options, Utc::now());
        let job_id = self.store.insert(job).await?;
        self.notifier(queue).notify_one();

        debug!(queue = %queue, job_id = %job_id, job_name = %request.job_name, "job enqueued");
        Ok(EnqueueResult { job_id, queue })
    }

    /// Register a repeatable job under `key`.
    ///
    /// Registering the same key again, from this process or another one
    /// sharing the store, does not create a second schedule.
    pub async fn enqueue_repeating(
        &self,
        request: JobRequest,
        repeat: Repeat,
        key: &str,
    ) -> Result<EnqueueResult, JobQueueError> {
        let queue: QueueName = request.queue.parse()?;
        self.validate(queue, &request.job_name, &request.data)?;

        let now = Utc::now();
        let registration = RepeatRegistration::new(
            key,
            queue,
            &request.job_name,
            request.data,
            repeat,
            request.options.retry,
            now,
        )?;
        let job_id = self.store.register_repeat(registration, now).await?;
        self.notifier(queue).notify_one();
        Ok(EnqueueResult { job_id, queue })
    }

    /// Remove a repeat registration. Returns false if `key` was not registered.
    pub async fn remove_repeating(&self, queue: &str, key: &str) -> Result<bool, JobQueueError> {
        let queue: QueueName = queue.parse()?;
        self.store.remove_repeat(queue, key).await
    }

    pub async fn get_counts(&self, queue: &str) -> Result<JobCounts, JobQueueError> {
        let queue: QueueName = queue.parse()?;
        self.store.counts(queue).await
    }

    /// Counts for every queue, keyed by queue name.
    pub async fn all_counts(&self) -> Result<BTreeMap<QueueName, JobCounts>, JobQueueError> {
        let mut out = BTreeMap::new();
        for name in QueueName::ALL {
            out.insert(name, self.store.counts(name).await?);
        }
        Ok(out)
    }

    pub async fn get_job(&self, queue: &str, job_id: &str) -> Result<Job, JobQueueError> {
        let name: QueueName = queue.parse()?;
        self.store
            .get(name, job_id)
            .await?
            .ok_or_else(|| JobQueueError::NotFound {
                queue: queue.to_owned(),
                job_id: job_id.to_owned(),
            })
    }

    pub(crate) async fn claim(&self, queue: QueueName) -> Result<Option<Job>, JobQueueError> {
        self.store.claim(queue, Utc::now()).await
    }

    pub(crate) async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        returnvalue: Value,
    ) -> Result<(), JobQueueError> {
        self.store.complete(queue, job_id, returnvalue, Utc::now()).await
    }

    pub(crate) async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        reason: &str,
        retryable: bool,
    ) -> Result<FailOutcome, JobQueueError> {
        let outcome = self
            .store
            .fail(queue, job_id, reason, retryable, Utc::now())
            .await?;
        if matches!(outcome, FailOutcome::Retrying { .. }) {
            self.notifier(queue).notify_one();
        }
        Ok(outcome)
    }

    pub(crate) async fn next_due(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>, JobQueueError> {
        self.store.next_due(queue).await
    }

    pub(crate) fn notifier(&self, queue: QueueName) -> Arc<Notify> {
        // every QueueName is inserted in with_store
        self.notifiers[&queue].clone()
    }

    fn validate(&self, queue: QueueName, job_name: &str, data: &Value) -> Result<(), JobQueueError> {
        match self.validator.as_ref() {
            Some(v) => v
                .validate(queue, job_name, data)
                .map_err(|reason| JobQueueError::InvalidPayload {
                    job_name: job_name.to_owned(),
                    reason,
                }),
            None => Ok(()),
        }
    }
}
