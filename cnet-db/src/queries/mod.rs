// Per-table query functions. Each takes any executor so callers can run
// them against the pool or inside a transaction.

pub mod audit_logs;
pub mod infrastructure_configs;
pub mod metrics_snapshots;
pub mod queue_jobs;
pub mod service_credentials;
pub mod service_statuses;
