//! Job execution errors.

use cnet_auth::CipherError;
use cnet_db::StoreError;
use cnet_job_queue::{JobFailure, JobQueueError};
use thiserror::Error;

use crate::notifier::NotifyError;
use crate::probe::ProbeError;

/// Errors that may occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The job's declared user is not the principal it executes as.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Missing credential, configuration or required id.
    #[error("{0}")]
    Configuration(String),

    /// A backup or service action reported failure.
    #[error("{0}")]
    ActionFailed(String),

    #[error("secret decryption failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("notification delivery failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("queue error: {0}")]
    Queue(#[from] JobQueueError),
}

impl JobError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unauthorized(_) | Self::InvalidPayload(_))
    }
}

impl From<JobError> for JobFailure {
    fn from(err: JobError) -> Self {
        if err.is_retryable() {
            JobFailure::retryable(err.to_string())
        } else {
            JobFailure::permanent(err.to_string())
        }
    }
}
