//! Job executor trait for implementing job handlers.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Job;

/// Why a job attempt failed, and whether another attempt could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    /// A failure the retry policy should re-attempt.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will repeat on every attempt; the job fails immediately.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobFailure {}

/// Trait for implementing job executors.
///
/// A worker hands every job it claims to its executor. `Ok` carries the
/// job's return value; `Err` feeds the queue's retry policy.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<Value, JobFailure>;
}

/// Validates a payload before it is stored.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, queue: crate::QueueName, job_name: &str, data: &Value) -> Result<(), String>;
}
