//! Named job queues for the C-Net background workers.
//!
//! Six fixed queues sit behind a [`JobQueueClient`]. Each queue applies a
//! retry policy (3 attempts, exponential backoff from 2s by default) and a
//! retention policy for finished jobs, and supports repeat registrations
//! keyed by a stable id. Jobs live in a [`QueueStore`]; a durable store
//! shared by several processes lets one process enqueue and another work.
//!
//! # Architecture
//!
//! - [`JobQueueClient`] - Registry of all queues; enqueue, inspect, repeat
//! - [`Worker`] - Concurrency-bounded consumer of one queue
//! - [`JobExecutor`] - Trait for the code a worker runs per job
//! - [`QueueStore`] - Where jobs live; [`MemoryQueueStore`] for a single process
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cnet_job_queue::{
//!     async_trait, Job, JobExecutor, JobFailure, JobQueueClient, JobRequest, QueueName, Worker,
//!     WorkerOptions,
//! };
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl JobExecutor for Echo {
//!     async fn execute(&self, job: &Job) -> Result<Value, JobFailure> {
//!         Ok(job.data.clone())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = JobQueueClient::new();
//!     let mut worker = Worker::new(
//!         QueueName::Notifications,
//!         client.clone(),
//!         Arc::new(Echo),
//!         WorkerOptions::for_queue(QueueName::Notifications),
//!     )
//!     .spawn();
//!
//!     let request = JobRequest::new("notifications", "custom", json!({"message": "hi"}));
//!     let result = client.enqueue(request).await.unwrap();
//!     println!("Enqueued job: {}", result.job_id);
//!
//!     worker.close().await;
//! }
//! ```

mod client;
mod error;
mod executor;
mod queue;
mod schedule;
mod store;
mod types;
mod worker;

pub use client::JobQueueClient;
pub use error::JobQueueError;
pub use executor::{JobExecutor, JobFailure, PayloadValidator};
pub use store::{MemoryQueueStore, QueueStore};
pub use types::{
    EnqueueResult, FailOutcome, Job, JobCounts, JobOptions, JobRequest, JobState, QueueName,
    Repeat, RepeatRegistration, RetentionPolicy, RetryPolicy,
};
pub use worker::{Worker, WorkerHandle, WorkerOptions};

// Re-export async_trait for convenience when implementing JobExecutor
pub use async_trait::async_trait;
