//! Per-queue job bookkeeping for the in-memory store.
//!
//! Every transition takes `now` explicitly so the state machine can be driven
//! deterministically.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::JobQueueError;
use crate::types::{
    FailOutcome, Job, JobCounts, JobState, QueueName, RepeatRegistration, RetentionPolicy,
};

#[derive(Debug)]
pub(crate) struct QueueState {
    name: QueueName,
    retention: RetentionPolicy,
    jobs: HashMap<String, Job>,
    waiting: VecDeque<String>,
    delayed: BTreeSet<(DateTime<Utc>, String)>,
    active: HashSet<String>,
    /// Finished job ids, oldest first.
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    repeats: HashMap<String, RepeatRegistration>,
}

impl QueueState {
    pub(crate) fn new(name: QueueName, retention: RetentionPolicy) -> Self {
        Self {
            name,
            retention,
            jobs: HashMap::new(),
            waiting: VecDeque::new(),
            delayed: BTreeSet::new(),
            active: HashSet::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            repeats: HashMap::new(),
        }
    }

    /// Add a job. An existing job with the same id wins and its id is returned.
    pub(crate) fn insert_new(&mut self, job: Job) -> String {
        let id = job.id.clone();
        if !self.jobs.contains_key(&id) {
            self.insert(job);
        }
        id
    }

    /// Register a repeat under its key. Re-registering an identical repeat is a no-op.
    pub(crate) fn register_repeat(
        &mut self,
        registration: RepeatRegistration,
        now: DateTime<Utc>,
    ) -> String {
        if let Some(existing) = self.repeats.get(&registration.key) {
            if existing.same_schedule(&registration) {
                return existing.pending_id();
            }
            let key = registration.key.clone();
            self.remove_repeat(&key);
        }

        let id = self.insert_new(registration.occurrence(now));
        self.repeats.insert(registration.key.clone(), registration);
        id
    }

    /// Drop a repeat registration and its pending occurrence.
    pub(crate) fn remove_repeat(&mut self, key: &str) -> bool {
        let Some(registration) = self.repeats.remove(key) else {
            return false;
        };
        let pending = registration.pending_id();
        if self
            .jobs
            .get(&pending)
            .is_some_and(|j| matches!(j.state, JobState::Waiting | JobState::Delayed))
        {
            self.remove_job(&pending);
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn repeat_count(&self) -> usize {
        self.repeats.len()
    }

    /// Lease the next due job, oldest first.
    pub(crate) fn claim(&mut self, now: DateTime<Utc>) -> Option<Job> {
        self.promote_due(now);
        let id = self.waiting.pop_front()?;
        let job = self.jobs.get_mut(&id)?;
        job.start_attempt(now);
        self.active.insert(id);
        let job = job.clone();

        if let Some(key) = job.repeat_key.as_deref() {
            self.advance_repeat(key, &job, now);
        }
        Some(job)
    }

    pub(crate) fn complete(
        &mut self,
        job_id: &str,
        returnvalue: Value,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        self.active_job(job_id)?.complete(returnvalue, now);
        self.active.remove(job_id);
        self.completed.push_back(job_id.to_owned());
        self.prune(now);
        Ok(())
    }

    /// Record a failed attempt, rescheduling with backoff while attempts remain.
    pub(crate) fn fail(
        &mut self,
        job_id: &str,
        reason: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, JobQueueError> {
        let job = self.active_job(job_id)?;
        let outcome = job.record_failure(reason, retryable, now);
        let run_at = job.run_at;

        self.active.remove(job_id);
        match outcome {
            FailOutcome::Retrying { .. } => {
                self.delayed.insert((run_at, job_id.to_owned()));
            }
            FailOutcome::Failed { .. } => {
                self.failed.push_back(job_id.to_owned());
                self.prune(now);
            }
        }
        Ok(outcome)
    }

    pub(crate) fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub(crate) fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len(),
            active: self.active.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            delayed: self.delayed.len(),
        }
    }

    /// Earliest pending run time, if any job is waiting or delayed.
    pub(crate) fn next_due(&self) -> Option<DateTime<Utc>> {
        if let Some(id) = self.waiting.front() {
            return self.jobs.get(id).map(|j| j.run_at);
        }
        self.delayed.first().map(|(at, _)| *at)
    }

    /// Return every active job to the back of the waiting line.
    pub(crate) fn requeue_active(&mut self) -> usize {
        let mut ids: Vec<String> = self.active.drain().collect();
        ids.sort_by_key(|id| self.jobs.get(id).map(|j| j.enqueued_at));
        for id in &ids {
            if let Some(job) = self.jobs.get_mut(id) {
                job.requeue();
                self.waiting.push_back(id.clone());
            }
        }
        ids.len()
    }

    fn insert(&mut self, job: Job) {
        let id = job.id.clone();
        match job.state {
            JobState::Waiting => self.waiting.push_back(id.clone()),
            JobState::Delayed => {
                self.delayed.insert((job.run_at, id.clone()));
            }
            JobState::Active => {
                self.active.insert(id.clone());
            }
            JobState::Completed => self.completed.push_back(id.clone()),
            JobState::Failed => self.failed.push_back(id.clone()),
        }
        self.jobs.insert(id, job);
    }

    /// Schedule the occurrence after the one just claimed.
    fn advance_repeat(&mut self, key: &str, claimed: &Job, now: DateTime<Utc>) {
        let Some(registration) = self.repeats.get(key) else {
            return;
        };
        // Retries of an older occurrence do not move the schedule.
        if registration.pending_id() != claimed.id {
            return;
        }
        match registration.advance(now) {
            Ok(next) => {
                self.insert_new(next.occurrence(now));
                self.repeats.insert(key.to_owned(), next);
            }
            Err(e) => {
                tracing::error!(queue = %self.name, repeat_key = key, error = %e, "failed to schedule next occurrence");
            }
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some((at, _)) = self.delayed.first() {
            if *at > now {
                break;
            }
            let Some((_, id)) = self.delayed.pop_first() else {
                break;
            };
            if let Some(job) = self.jobs.get_mut(&id) {
                job.state = JobState::Waiting;
                self.waiting.push_back(id);
            }
        }
    }

    fn active_job(&mut self, job_id: &str) -> Result<&mut Job, JobQueueError> {
        match self.jobs.get_mut(job_id) {
            Some(job) if job.state == JobState::Active => Ok(job),
            _ => Err(JobQueueError::NotFound {
                queue: self.name.to_string(),
                job_id: job_id.to_owned(),
            }),
        }
    }

    fn remove_job(&mut self, job_id: &str) {
        let Some(job) = self.jobs.remove(job_id) else {
            return;
        };
        match job.state {
            JobState::Waiting => self.waiting.retain(|id| id != job_id),
            JobState::Delayed => {
                self.delayed.remove(&(job.run_at, job.id.clone()));
            }
            JobState::Active => {
                self.active.remove(job_id);
            }
            JobState::Completed => self.completed.retain(|id| id != job_id),
            JobState::Failed => self.failed.retain(|id| id != job_id),
        }
    }

    /// Apply retention to finished jobs.
    fn prune(&mut self, now: DateTime<Utc>) {
        let completed_cutoff = self.retention.completed_cutoff(now);
        let failed_cutoff = self.retention.failed_cutoff(now);

        let expired = |ids: &VecDeque<String>, jobs: &HashMap<String, Job>, cutoff, max: Option<usize>| {
            let over = max.map_or(0, |m| ids.len().saturating_sub(m));
            ids.iter()
                .enumerate()
                .filter(|(i, id)| {
                    *i < over
                        || jobs
                            .get(*id)
                            .and_then(|j| j.finished_at)
                            .is_some_and(|at| at < cutoff)
                })
                .map(|(_, id)| id.clone())
                .collect::<Vec<_>>()
        };

        let mut doomed = expired(
            &self.completed,
            &self.jobs,
            completed_cutoff,
            self.retention.completed_max_count,
        );
        doomed.extend(expired(
            &self.failed,
            &self.jobs,
            failed_cutoff,
            self.retention.failed_max_count,
        ));
        for id in doomed {
            self.remove_job(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobOptions, Repeat, RetryPolicy};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;
    use std::time::Duration;

    impl QueueState {
        fn add(&mut self, name: &str, data: Value, options: &JobOptions, now: DateTime<Utc>) -> String {
            self.insert_new(Job::from_options(self.name, name, data, options, now))
        }

        fn add_repeat(
            &mut self,
            key: &str,
            name: &str,
            data: Value,
            repeat: Repeat,
            options: &JobOptions,
            now: DateTime<Utc>,
        ) -> Result<String, JobQueueError> {
            let registration =
                RepeatRegistration::new(key, self.name, name, data, repeat, options.retry, now)?;
            Ok(self.register_repeat(registration, now))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn state() -> QueueState {
        QueueState::new(QueueName::Backups, RetentionPolicy::default())
    }

    #[test]
    fn claims_in_fifo_order() {
        let mut q = state();
        let a = q.add("a", json!({}), &JobOptions::default(), t0());
        let b = q.add("b", json!({}), &JobOptions::default(), t0());
        assert_eq!(q.counts().waiting, 2);

        assert_eq!(q.claim(t0()).unwrap().id, a);
        assert_eq!(q.claim(t0()).unwrap().id, b);
        assert!(q.claim(t0()).is_none());
        assert_eq!(q.counts().active, 2);
    }

    #[test]
    fn explicit_job_id_is_unique() {
        let mut q = state();
        let opts = JobOptions::default().with_job_id("nightly");
        let first = q.add("a", json!({"n": 1}), &opts, t0());
        let second = q.add("a", json!({"n": 2}), &opts, t0());
        assert_eq!(first, second);
        assert_eq!(q.counts().total(), 1);
        assert_eq!(q.get("nightly").unwrap().data, json!({"n": 1}));
    }

    #[test]
    fn delayed_jobs_wait_for_their_time() {
        let mut q = state();
        let opts = JobOptions::default().with_delay(Duration::from_secs(10));
        q.add("a", json!({}), &opts, t0());
        assert_eq!(q.counts().delayed, 1);
        assert!(q.claim(t0() + ChronoDuration::seconds(9)).is_none());
        assert!(q.claim(t0() + ChronoDuration::seconds(10)).is_some());
    }

    #[test]
    fn always_failing_job_fails_after_exactly_three_attempts() {
        let mut q = state();
        let id = q.add("flaky", json!({}), &JobOptions::default(), t0());
        let mut now = t0();
        let mut attempts = 0;

        loop {
            let Some(job) = q.claim(now) else {
                // nothing due yet; jump past the backoff
                now += ChronoDuration::seconds(60);
                if q.counts().delayed == 0 {
                    break;
                }
                continue;
            };
            attempts += 1;
            match q.fail(&job.id, "boom", true, now).unwrap() {
                FailOutcome::Retrying { attempt } => {
                    let retry_at = q.get(&id).unwrap().run_at;
                    let expected = RetryPolicy::default().backoff(attempt);
                    assert_eq!(retry_at - now, ChronoDuration::from_std(expected).unwrap());
                }
                FailOutcome::Failed { attempt } => assert_eq!(attempt, 3),
            }
        }

        assert_eq!(attempts, 3);
        let job = q.get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.failed_reason.as_deref(), Some("boom"));
        assert!(q.claim(now + ChronoDuration::days(1)).is_none());
    }

    #[test]
    fn permanent_failure_skips_retries() {
        let mut q = state();
        let id = q.add("backup", json!({}), &JobOptions::default(), t0());
        let job = q.claim(t0()).unwrap();
        let outcome = q.fail(&job.id, "Unauthorized", false, t0()).unwrap();
        assert_eq!(outcome, FailOutcome::Failed { attempt: 1 });
        assert_eq!(q.get(&id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn completing_records_result() {
        let mut q = state();
        let id = q.add("a", json!({}), &JobOptions::default(), t0());
        q.claim(t0()).unwrap();
        q.complete(&id, json!({"ok": true}), t0()).unwrap();
        let job = q.get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.returnvalue, Some(json!({"ok": true})));
        assert_eq!(job.progress, 100);
        assert!(q.complete(&id, json!(null), t0()).is_err());
    }

    #[test]
    fn completed_retention_keeps_last_thousand() {
        let mut q = state();
        for _ in 0..1005 {
            let id = q.add("a", json!({}), &JobOptions::default(), t0());
            q.claim(t0()).unwrap();
            q.complete(&id, json!(null), t0()).unwrap();
        }
        assert_eq!(q.counts().completed, 1000);
    }

    #[test]
    fn completed_retention_expires_after_a_day() {
        let mut q = state();
        let old = q.add("a", json!({}), &JobOptions::default(), t0());
        q.claim(t0()).unwrap();
        q.complete(&old, json!(null), t0()).unwrap();

        let later = t0() + ChronoDuration::hours(25);
        let fresh = q.add("a", json!({}), &JobOptions::default(), later);
        q.claim(later).unwrap();
        q.complete(&fresh, json!(null), later).unwrap();

        assert!(q.get(&old).is_none());
        assert!(q.get(&fresh).is_some());
    }

    #[test]
    fn failed_retention_expires_after_a_week() {
        let mut q = state();
        let opts = JobOptions::default().with_retry(RetryPolicy {
            attempts: 1,
            backoff_base_ms: 10,
        });
        let old = q.add("a", json!({}), &opts, t0());
        q.claim(t0()).unwrap();
        q.fail(&old, "x", true, t0()).unwrap();

        let six_days = t0() + ChronoDuration::days(6);
        let mid = q.add("a", json!({}), &opts, six_days);
        q.claim(six_days).unwrap();
        q.fail(&mid, "x", true, six_days).unwrap();
        assert!(q.get(&old).is_some());

        let eight_days = t0() + ChronoDuration::days(8);
        let new = q.add("a", json!({}), &opts, eight_days);
        q.claim(eight_days).unwrap();
        q.fail(&new, "x", true, eight_days).unwrap();
        assert!(q.get(&old).is_none());
        assert!(q.get(&mid).is_some());
    }

    #[test]
    fn repeat_registration_is_idempotent() {
        let mut q = QueueState::new(QueueName::HealthChecks, RetentionPolicy::default());
        let every = Repeat::every(Duration::from_secs(120));
        let opts = JobOptions::default();

        let first = q
            .add_repeat("health-checks-repeat", "check-all", json!({}), every.clone(), &opts, t0())
            .unwrap();
        let second = q
            .add_repeat("health-checks-repeat", "check-all", json!({}), every, &opts, t0())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(q.repeat_count(), 1);
        let counts = q.counts();
        assert_eq!(counts.waiting + counts.delayed, 1);
    }

    #[test]
    fn claiming_an_occurrence_schedules_the_next() {
        let mut q = QueueState::new(QueueName::Metrics, RetentionPolicy::default());
        let every = Repeat::every(Duration::from_secs(30));
        q.add_repeat("metrics-collection-u1", "collect", json!({"userId": "u1"}), every, &JobOptions::default(), t0())
            .unwrap();

        let job = q.claim(t0()).unwrap();
        assert_eq!(job.repeat_key.as_deref(), Some("metrics-collection-u1"));
        assert_eq!(q.counts().delayed, 1);
        assert!(q.claim(t0() + ChronoDuration::seconds(29)).is_none());

        let next = q.claim(t0() + ChronoDuration::seconds(30)).unwrap();
        assert_ne!(next.id, job.id);
        assert_eq!(next.data, json!({"userId": "u1"}));
    }

    #[test]
    fn changed_repeat_replaces_the_pending_occurrence() {
        let mut q = QueueState::new(QueueName::Metrics, RetentionPolicy::default());
        let opts = JobOptions::default();
        q.add_repeat("k", "collect", json!({}), Repeat::every(Duration::from_secs(30)), &opts, t0())
            .unwrap();
        q.add_repeat("k", "collect", json!({}), Repeat::cron("0 2 * * *"), &opts, t0())
            .unwrap();
        assert_eq!(q.repeat_count(), 1);
        let counts = q.counts();
        assert_eq!(counts.waiting + counts.delayed, 1);
        assert_eq!(counts.delayed, 1);
    }

    #[test]
    fn removing_a_repeat_drops_its_occurrence() {
        let mut q = QueueState::new(QueueName::Cleanup, RetentionPolicy::default());
        q.add_repeat("cleanup-daily-repeat", "cleanup", json!({"type": "all"}), Repeat::cron("0 2 * * *"), &JobOptions::default(), t0())
            .unwrap();
        assert!(q.remove_repeat("cleanup-daily-repeat"));
        assert!(!q.remove_repeat("cleanup-daily-repeat"));
        assert_eq!(q.counts().total(), 0);
    }

    #[test]
    fn requeue_returns_orphaned_active_jobs_to_waiting() {
        let mut q = state();
        let id = q.add("a", json!({}), &JobOptions::default(), t0());
        q.claim(t0()).unwrap();

        assert_eq!(q.requeue_active(), 1);
        let job = q.get(&id).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.started_at, None);
        assert_eq!(q.counts().waiting, 1);
        assert_eq!(q.counts().active, 0);
        assert_eq!(q.claim(t0()).unwrap().attempts_made, 2);
    }
}
