//! Idempotent schema bootstrap and verification.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::schema::{
    meta_keys, RequiredObject, SchemaObjectKind, REQUIRED_OBJECTS, SCHEMA_STATEMENTS,
    SCHEMA_VERSION,
};

/// Observed state of a required schema object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    Online,
    Missing,
    Degraded(String),
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectState::Online => write!(f, "ONLINE"),
            ObjectState::Missing => write!(f, "MISSING"),
            ObjectState::Degraded(reason) => write!(f, "DEGRADED ({reason})"),
        }
    }
}

/// Verification result for a single required object.
#[derive(Debug, Clone)]
pub struct ObjectReport {
    pub name: String,
    pub kind: SchemaObjectKind,
    pub state: ObjectState,
}

/// Structured report produced by `verify()`.
#[derive(Debug, Clone)]
pub struct SchemaReport {
    pub items: Vec<ObjectReport>,
    pub verified_at: DateTime<Utc>,
}

impl SchemaReport {
    /// True when every required object is online.
    pub fn is_healthy(&self) -> bool {
        self.items.iter().all(|i| i.state == ObjectState::Online)
    }

    /// Names of objects that are not online.
    pub fn failing(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| i.state != ObjectState::Online)
            .map(|i| i.name.as_str())
            .collect()
    }
}

/// Bootstraps and verifies the store schema.
///
/// `bootstrap()` is safe to call concurrently; invocations serialize on an
/// internal lock. After it succeeds, every index `verify()` checks reports
/// ONLINE.
pub struct IndexManager {
    pool: SqlitePool,
    embedding_dim: usize,
    bootstrap_timeout: Duration,
    bootstrap_lock: tokio::sync::Mutex<()>,
    last_verified: Mutex<Option<DateTime<Utc>>>,
}

impl IndexManager {
    pub fn new(pool: SqlitePool, embedding_dim: usize) -> Self {
        Self {
            pool,
            embedding_dim,
            bootstrap_timeout: Duration::from_secs(30),
            bootstrap_lock: tokio::sync::Mutex::new(()),
            last_verified: Mutex::new(None),
        }
    }

    /// Override the bootstrap deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// When verification last ran, if ever.
    pub fn last_verified_at(&self) -> Option<DateTime<Utc>> {
        *self.last_verified.lock().expect("last_verified lock poisoned")
    }

    /// Create every required table, index, and constraint, idempotently,
    /// and record the embedding dimension. Blocks until verification
    /// reports every object ONLINE or the deadline passes.
    pub async fn bootstrap(&self) -> Result<()> {
        let _guard = self.bootstrap_lock.lock().await;

        tokio::time::timeout(self.bootstrap_timeout, self.bootstrap_inner())
            .await
            .map_err(|_| StoreError::Schema("schema bootstrap timed out".to_string()))?
    }

    async fn bootstrap_inner(&self) -> Result<()> {
        info!("Bootstrapping store schema (dim={})", self.embedding_dim);

        for batch in SCHEMA_STATEMENTS {
            sqlx::raw_sql(batch).execute(&self.pool).await?;
        }

        // Record or check the embedding dimension. A store bootstrapped
        // with a different model dimension must not silently serve queries.
        match self.read_meta(meta_keys::EMBEDDING_DIM).await? {
            Some(raw) => {
                let stored: usize = raw.parse().map_err(|_| {
                    StoreError::Schema(format!("corrupt embedding_dim metadata '{raw}'"))
                })?;
                if stored != self.embedding_dim {
                    return Err(StoreError::Schema(format!(
                        "store was created with embedding dimension {stored}, \
                         configuration says {}; reingest required",
                        self.embedding_dim
                    )));
                }
            }
            None => {
                self.write_meta(meta_keys::EMBEDDING_DIM, &self.embedding_dim.to_string())
                    .await?;
                self.write_meta(meta_keys::SCHEMA_VERSION, SCHEMA_VERSION)
                    .await?;
            }
        }

        let report = self.verify().await?;
        if !report.is_healthy() {
            return Err(StoreError::Schema(format!(
                "schema objects not online after bootstrap: {:?}",
                report.failing()
            )));
        }

        info!("Store schema ready (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Check every required object and report its observed state.
    pub async fn verify(&self) -> Result<SchemaReport> {
        let mut items = Vec::with_capacity(REQUIRED_OBJECTS.len());
        for required in REQUIRED_OBJECTS {
            let state = self.check_object(required).await?;
            debug!("schema object '{}': {}", required.name, state);
            items.push(ObjectReport {
                name: required.name.to_string(),
                kind: required.kind,
                state,
            });
        }

        let report = SchemaReport {
            items,
            verified_at: Utc::now(),
        };
        *self.last_verified.lock().expect("last_verified lock poisoned") =
            Some(report.verified_at);
        Ok(report)
    }

    async fn check_object(&self, required: &RequiredObject) -> Result<ObjectState> {
        match required.master_name {
            Some(name) => {
                let found: Option<(String,)> =
                    sqlx::query_as("SELECT name FROM sqlite_master WHERE name = ?")
                        .bind(name)
                        .fetch_optional(&self.pool)
                        .await?;
                Ok(if found.is_some() {
                    ObjectState::Online
                } else {
                    ObjectState::Missing
                })
            }
            // The vector index check: the recorded dimension must match
            // the configured one.
            None => match self.read_meta(meta_keys::EMBEDDING_DIM).await? {
                Some(raw) if raw == self.embedding_dim.to_string() => Ok(ObjectState::Online),
                Some(raw) => Ok(ObjectState::Degraded(format!(
                    "recorded dimension {raw}, configured {}",
                    self.embedding_dim
                ))),
                None => Ok(ObjectState::Missing),
            },
        }
    }

    async fn read_meta(&self, key: &str) -> Result<Option<String>> {
        // Tolerate a completely empty database: verify() may run before
        // any bootstrap.
        let table: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE name = 'schema_meta'")
                .fetch_optional(&self.pool)
                .await?;
        if table.is_none() {
            return Ok(None);
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM schema_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn write_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
