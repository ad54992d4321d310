//! Storage seam behind the queue client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::JobQueueError;
use crate::queue::QueueState;
use crate::types::{FailOutcome, Job, JobCounts, QueueName, RepeatRegistration, RetentionPolicy};

/// Where queued jobs and repeat registrations live.
///
/// Every process that shares a store sees the same queues: a job enqueued by
/// one process may be claimed by another. Implementations must make
/// [`claim`](Self::claim) atomic so a job is leased to exactly one worker, and
/// must keep one registration per repeat key.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Store `job` unless a job with the same id exists. Returns the id either way.
    async fn insert(&self, job: Job) -> Result<String, JobQueueError>;

    /// Create or update the registration under its key and make sure its
    /// pending occurrence exists. Returns the pending occurrence id.
    async fn register_repeat(
        &self,
        registration: RepeatRegistration,
        now: DateTime<Utc>,
    ) -> Result<String, JobQueueError>;

    async fn remove_repeat(&self, queue: QueueName, key: &str) -> Result<bool, JobQueueError>;

    /// Lease the next due job. Claiming a repeat occurrence schedules the next one.
    async fn claim(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<Job>, JobQueueError>;

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        returnvalue: Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError>;

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        reason: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, JobQueueError>;

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, JobQueueError>;

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, JobQueueError>;

    /// Earliest run time among waiting and delayed jobs.
    async fn next_due(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>, JobQueueError>;

    /// Return jobs left active by a worker that is gone to waiting.
    async fn requeue_active(&self) -> Result<usize, JobQueueError>;
}

/// Process-local store. Nothing survives a restart and nothing is shared
/// with other processes.
#[derive(Debug)]
pub struct MemoryQueueStore {
    queues: HashMap<QueueName, RwLock<QueueState>>,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::default())
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        let queues = QueueName::ALL
            .into_iter()
            .map(|name| (name, RwLock::new(QueueState::new(name, retention))))
            .collect();
        Self { queues }
    }

    #[inline]
    fn queue(&self, name: QueueName) -> &RwLock<QueueState> {
        // every QueueName is inserted in with_retention
        &self.queues[&name]
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, job: Job) -> Result<String, JobQueueError> {
        Ok(self.queue(job.queue).write().await.insert_new(job))
    }

    async fn register_repeat(
        &self,
        registration: RepeatRegistration,
        now: DateTime<Utc>,
    ) -> Result<String, JobQueueError> {
        Ok(self
            .queue(registration.queue)
            .write()
            .await
            .register_repeat(registration, now))
    }

    async fn remove_repeat(&self, queue: QueueName, key: &str) -> Result<bool, JobQueueError> {
        Ok(self.queue(queue).write().await.remove_repeat(key))
    }

    async fn claim(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<Job>, JobQueueError> {
        Ok(self.queue(queue).write().await.claim(now))
    }

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        returnvalue: Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        self.queue(queue).write().await.complete(job_id, returnvalue, now)
    }

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        reason: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, JobQueueError> {
        self.queue(queue)
            .write()
            .await
            .fail(job_id, reason, retryable, now)
    }

    async fn get(&self, queue: QueueName, job_id: &str) -> Result<Option<Job>, JobQueueError> {
        Ok(self.queue(queue).read().await.get(job_id).cloned())
    }

    async fn counts(&self, queue: QueueName) -> Result<JobCounts, JobQueueError> {
        Ok(self.queue(queue).read().await.counts())
    }

    async fn next_due(&self, queue: QueueName) -> Result<Option<DateTime<Utc>>, JobQueueError> {
        Ok(self.queue(queue).read().await.next_due())
    }

    async fn requeue_active(&self) -> Result<usize, JobQueueError> {
        let mut total = 0;
        for name in QueueName::ALL {
            total += self.queue(name).write().await.requeue_active();
        }
        Ok(total)
    }
}
