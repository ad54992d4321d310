pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;
pub mod queue_store;
pub mod store;
mod utils;

/// The sqlx database driver every query targets.
pub type DbBackend = sqlx::Sqlite;

// Re-exports for public API
pub use config::DbConnectionConfig;
pub use error::{DbConnectionError, StoreError};
pub use models::{
    AuditLogEntry, AuditStatus, HealthState, InfrastructureConfig, MetricsSnapshot,
    NewAuditLogEntry, NewInfrastructureConfig, NewMetricsSnapshot, NewServiceCredential,
    ServiceCredential, ServiceKind, ServiceStatus,
};
pub use pool::{create_pool, run_migrations, DbPool};
pub use queue_store::SqlQueueStore;
pub use store::{SqlStore, Store};
