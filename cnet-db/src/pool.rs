use std::fs;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::DbConnectionConfig;
use crate::error::DbConnectionError;

pub type DbPool = SqlitePool;

/// Open a pool for `config.url`. File databases are created along with any
/// missing parent directory.
pub async fn create_pool(config: &DbConnectionConfig) -> Result<DbPool, DbConnectionError> {
    let url = config.url.trim();
    if url.is_empty() {
        return Err(DbConnectionError::EmptyDatabaseUrl);
    }

    let options: SqliteConnectOptions = url.parse()?;
    let options = options.create_if_missing(true).foreign_keys(true);
    if let Some(parent) = options.get_filename().parent() {
        ensure_dir(parent)?;
    }

    let mut pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout());
    if let Some(idle) = config.idle_timeout() {
        pool = pool.idle_timeout(idle);
    }

    let pool = pool.connect_with(options).await?;
    info!(
        database_url = %url,
        max_connections = config.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

/// Apply all embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbConnectionError> {
    cnet_migrations::sqlite_migrator().run(pool).await?;
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), DbConnectionError> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| {
        DbConnectionError::FileCreation(format!(
            "failed to create database directory '{}': {e}",
            dir.display()
        ))
    })
}
