//! SQLite connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use lexgraph_config::StoreConfig;

use crate::error::{Result, StoreError};

/// Create the shared connection pool from store configuration.
///
/// WAL journaling keeps readers concurrent with the single writer; the busy
/// timeout absorbs short lock contention before it surfaces as an error.
pub async fn create_pool(config: &StoreConfig) -> Result<SqlitePool> {
    ensure_database_directory(&config.store_uri)?;

    // Pooled connections to a private in-memory database would each see
    // their own empty store; a memory URI is pinned to one shared
    // connection.
    let in_memory = config.store_uri.contains(":memory:");

    let mut connect_options = SqliteConnectOptions::from_str(&config.store_uri)
        .map_err(|_| StoreError::Connection(format!("invalid store uri '{}'", config.store_uri)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));
    if in_memory {
        connect_options = connect_options.shared_cache(true);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { config.pool_size })
        .min_connections(1)
        .acquire_timeout(Duration::from_millis(config.pool_acquire_timeout_ms))
        .connect_with(connect_options)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    info!("Store pool ready ({}, size={})", config.store_uri, config.pool_size);
    Ok(pool)
}

/// Create a single-connection in-memory pool for tests.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StoreError::Connection(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .shared_cache(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Probe that the store answers queries.
pub async fn verify_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    Ok(())
}

fn ensure_database_directory(store_uri: &str) -> Result<()> {
    let path = store_uri
        .strip_prefix("sqlite://")
        .or_else(|| store_uri.strip_prefix("sqlite:"))
        .unwrap_or(store_uri);

    if path == ":memory:" || path.is_empty() || path.starts_with(':') {
        return Ok(());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(format!("cannot create data dir: {e}")))?;
        }
    }
    Ok(())
}
