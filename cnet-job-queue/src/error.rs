//! Error types for the job queue system.

use thiserror::Error;

/// Errors that may occur while interacting with the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("unknown queue: {0}")]
    InvalidQueue(String),

    #[error("invalid payload for {job_name}: {reason}")]
    InvalidPayload { job_name: String, reason: String },

    #[error("invalid repeat schedule: {0}")]
    InvalidSchedule(String),

    #[error("job not found: {queue}/{job_id}")]
    NotFound { queue: String, job_id: String },

    #[error("queue storage error: {0}")]
    Storage(String),
}
