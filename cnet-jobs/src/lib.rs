//! Job kinds and handlers for the C-Net background workers.
//!
//! Every queue in [`cnet_job_queue`] carries exactly one [`JobKind`]. The
//! [`JobDispatcher`] decodes a claimed job into its kind and runs the
//! matching handler against a shared [`JobContext`]:
//!
//! - [`metrics`] - per-node utilisation snapshots from Proxmox
//! - [`health`] - service probes with up-to-down alerting
//! - [`backup`] - authorised, audited backups
//! - [`cleanup`] - retention deletes
//! - [`notification`] - rendered emails through a [`Notifier`]
//! - [`integrations`] - gravity updates, library scans, container restarts
//!
//! [`scheduler::register_scheduled_jobs`] installs the recurring jobs.

pub mod backup;
pub mod cleanup;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod infra;
pub mod integrations;
pub mod kinds;
pub mod metrics;
pub mod notification;
pub mod notifier;
pub mod probe;
pub mod scheduler;

pub use backup::{BackupRunner, DryRunBackups};
pub use context::JobContext;
pub use dispatcher::JobDispatcher;
pub use error::JobError;
pub use infra::{InfrastructureClient, ProxmoxClient};
pub use integrations::{DryRunServiceActions, ServiceActions};
pub use kinds::{JobKind, JobKindValidator};
pub use notifier::{LogNotifier, Notifier, SmtpNotifier, SmtpSettings};
pub use probe::{HttpServiceProbe, ProbeReport, ProbeTarget, ServiceProbe};
pub use scheduler::{register_scheduled_jobs, ScheduleSummary};
