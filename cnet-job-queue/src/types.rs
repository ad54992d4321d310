//! Core types for the job queue system.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobQueueError;
use crate::schedule;

/// The closed set of queues the system runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Metrics,
    HealthChecks,
    Backups,
    Cleanup,
    Notifications,
    ServiceIntegrations,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::Metrics,
        QueueName::HealthChecks,
        QueueName::Backups,
        QueueName::Cleanup,
        QueueName::Notifications,
        QueueName::ServiceIntegrations,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::HealthChecks => "health-checks",
            Self::Backups => "backups",
            Self::Cleanup => "cleanup",
            Self::Notifications => "notifications",
            Self::ServiceIntegrations => "service-integrations",
        }
    }

    /// Maximum number of jobs from this queue that may run at once.
    #[inline]
    pub const fn concurrency(self) -> usize {
        match self {
            Self::Notifications => 5,
            Self::ServiceIntegrations => 2,
            Self::Metrics | Self::HealthChecks | Self::Backups | Self::Cleanup => 1,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = JobQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| JobQueueError::InvalidQueue(s.to_owned()))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    /// Returns true if this state represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        })
    }
}

/// Attempt limit and exponential backoff applied when a job fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts_made` failed attempts.
    ///
    /// `base * 2^(attempts_made - 1)`: 2s, 4s, 8s, ... with the default base.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exp = attempts_made.saturating_sub(1).min(31);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }
}

/// How long finished jobs are kept for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed_max_age: Duration,
    pub completed_max_count: Option<usize>,
    pub failed_max_age: Duration,
    pub failed_max_count: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_age: Duration::from_secs(24 * 60 * 60),
            completed_max_count: Some(1000),
            failed_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            failed_max_count: None,
        }
    }
}

impl RetentionPolicy {
    /// Completed jobs that finished before this instant are dropped.
    pub fn completed_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - to_chrono(self.completed_max_age)
    }

    pub fn failed_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - to_chrono(self.failed_max_age)
    }
}

/// Per-job overrides applied at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Explicit job id. A second enqueue with the same id returns the existing job.
    pub job_id: Option<String>,
    pub delay: Option<Duration>,
    pub retry: RetryPolicy,
}

impl JobOptions {
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A request to enqueue a job on a named queue.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub queue: String,
    pub job_name: String,
    pub data: Value,
    pub options: JobOptions,
}

impl JobRequest {
    #[inline]
    pub fn new(queue: impl Into<String>, job_name: impl Into<String>, data: Value) -> Self {
        Self {
            queue: queue.into(),
            job_name: job_name.into(),
            data,
            options: JobOptions::default(),
        }
    }

    #[inline]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnqueueResult {
    pub job_id: String,
    pub queue: QueueName,
}

/// Recurrence of a repeatable job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Repeat {
    Every { every_ms: u64 },
    Cron { pattern: String },
}

impl Repeat {
    pub fn every(interval: Duration) -> Self {
        Self::Every {
            every_ms: interval.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn cron(pattern: impl Into<String>) -> Self {
        Self::Cron {
            pattern: pattern.into(),
        }
    }
}

/// A stable repeat registration; one pending occurrence exists per registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepeatRegistration {
    pub key: String,
    pub queue: QueueName,
    pub job_name: String,
    pub data: Value,
    pub repeat: Repeat,
    pub retry: RetryPolicy,
    pub next_run_at: DateTime<Utc>,
}

impl RepeatRegistration {
    /// A fresh registration whose first occurrence is due at the schedule's first fire time.
    pub(crate) fn new(
        key: &str,
        queue: QueueName,
        job_name: &str,
        data: Value,
        repeat: Repeat,
        retry: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self, JobQueueError> {
        schedule::validate(&repeat)?;
        Ok(Self {
            key: key.to_owned(),
            queue,
            job_name: job_name.to_owned(),
            data,
            next_run_at: schedule::first_run(&repeat, now)?,
            repeat,
            retry,
        })
    }

    /// Id of the occurrence scheduled at `at`.
    pub fn occurrence_id(&self, at: DateTime<Utc>) -> String {
        format!("repeat:{}:{}", self.key, at.timestamp_millis())
    }

    /// Id of the occurrence currently waiting to fire.
    pub fn pending_id(&self) -> String {
        self.occurrence_id(self.next_run_at)
    }

    /// True if `other` would fire the same job on the same schedule.
    pub fn same_schedule(&self, other: &RepeatRegistration) -> bool {
        self.repeat == other.repeat && self.job_name == other.job_name && self.data == other.data
    }

    /// The job for the pending occurrence.
    pub fn occurrence(&self, now: DateTime<Utc>) -> Job {
        let mut job = Job::new(
            self.pending_id(),
            self.queue,
            self.job_name.clone(),
            self.data.clone(),
            self.retry,
            now,
            self.next_run_at,
        );
        job.repeat_key = Some(self.key.clone());
        job
    }

    /// The registration after its pending occurrence has been claimed.
    pub fn advance(&self, now: DateTime<Utc>) -> Result<Self, JobQueueError> {
        Ok(Self {
            next_run_at: schedule::next_run(&self.repeat, self.next_run_at, now)?,
            ..self.clone()
        })
    }
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled after the backoff delay.
    Retrying { attempt: u32 },
    /// Attempts exhausted or the failure was permanent.
    Failed { attempt: u32 },
}

/// One unit of work owned by a queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue: QueueName,
    pub name: String,
    pub data: Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub retry: RetryPolicy,
    pub progress: u8,
    pub repeat_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub returnvalue: Option<Value>,
    pub failed_reason: Option<String>,
}

impl Job {
    pub(crate) fn new(
        id: String,
        queue: QueueName,
        name: impl Into<String>,
        data: Value,
        retry: RetryPolicy,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue,
            name: name.into(),
            data,
            state: if run_at > now {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            attempts_made: 0,
            retry,
            progress: 0,
            repeat_key: None,
            enqueued_at: now,
            run_at,
            started_at: None,
            finished_at: None,
            returnvalue: None,
            failed_reason: None,
        }
    }

    /// A job for `request`-style input, honouring an explicit id and delay.
    pub(crate) fn from_options(
        queue: QueueName,
        name: &str,
        data: Value,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let run_at = match options.delay {
            Some(delay) => now + to_chrono(delay),
            None => now,
        };
        Self::new(id, queue, name, data, options.retry, now, run_at)
    }

    /// True if a worker may claim the job at `now`.
    #[inline]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed) && self.run_at <= now
    }

    /// Lease the job for its next attempt.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, returnvalue: Value, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.progress = 100;
        self.finished_at = Some(now);
        self.returnvalue = Some(returnvalue);
        self.failed_reason = None;
    }

    /// Record a failed attempt, scheduling a retry with backoff while attempts remain.
    pub fn record_failure(&mut self, reason: &str, retryable: bool, now: DateTime<Utc>) -> FailOutcome {
        self.failed_reason = Some(reason.to_owned());
        let attempt = self.attempts_made;
        if retryable && attempt < self.retry.attempts {
            self.state = JobState::Delayed;
            self.run_at = now + to_chrono(self.retry.backoff(attempt));
            FailOutcome::Retrying { attempt }
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            FailOutcome::Failed { attempt }
        }
    }

    /// Put a job whose worker went away back in line. The attempt stays counted.
    pub fn requeue(&mut self) {
        self.state = JobState::Waiting;
        self.started_at = None;
    }
}

pub(crate) fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl JobCounts {
    #[inline]
    pub const fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_round_trip_through_strings() {
        for q in QueueName::ALL {
            assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
        }
        assert!(matches!(
            "emails".parse::<QueueName>(),
            Err(JobQueueError::InvalidQueue(name)) if name == "emails"
        ));
    }

    #[test]
    fn concurrency_per_queue() {
        let limits: Vec<usize> = QueueName::ALL.iter().map(|q| q.concurrency()).collect();
        assert_eq!(limits, vec![1, 1, 1, 1, 5, 2]);
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn failure_retries_until_attempts_run_out() {
        let now = Utc::now();
        let mut job = Job::from_options(QueueName::Backups, "backup", Value::Null, &JobOptions::default(), now);
        job.start_attempt(now);
        assert_eq!(job.record_failure("boom", true, now), FailOutcome::Retrying { attempt: 1 });
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.run_at - now, ChronoDuration::seconds(2));

        job.start_attempt(now);
        job.start_attempt(now);
        assert_eq!(job.record_failure("boom", true, now), FailOutcome::Failed { attempt: 3 });
        assert_eq!(job.finished_at, Some(now));
    }

    #[test]
    fn serde_names_match_wire_format() {
        assert_eq!(
            serde_json::to_value(QueueName::HealthChecks).unwrap(),
            "health-checks"
        );
        assert_eq!(serde_json::to_value(JobState::Delayed).unwrap(), "delayed");
    }
}
