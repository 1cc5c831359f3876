//! Error types for lexgraph-store.

use thiserror::Error;

/// Classification of a store failure.
///
/// Transient failures (disconnects, lock contention, pool exhaustion) are
/// retried with backoff; permanent failures surface immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying (disconnect, deadlock, busy database)
    Transient,
    /// Not worth retrying (constraint violation, malformed query)
    Permanent,
}

/// Errors that can occur in store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Query execution failure, classified transient or permanent
    #[error("store query failed ({kind:?}): {message}")]
    Query { kind: FailureKind, message: String },

    /// Connection or pool setup failure
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Per-query deadline exceeded
    #[error("store query '{op}' timed out")]
    Timeout { op: &'static str },

    /// Schema is missing, degraded, or incompatible
    #[error("schema error: {0}")]
    Schema(String),

    /// Entity lookup by id failed
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored or supplied embedding has the wrong dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Property map (de)serialization failure
    #[error("property serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Query {
                kind: FailureKind::Transient,
                ..
            }
        )
    }

    /// Shorthand for a transient query error.
    pub fn transient(message: impl Into<String>) -> Self {
        StoreError::Query {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent query error.
    pub fn permanent(message: impl Into<String>) -> Self {
        StoreError::Query {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                StoreError::transient("connection pool acquisition timed out")
            }
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => {
                StoreError::transient(err.to_string())
            }
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                // SQLite reports lock contention as "database is locked" /
                // "database table is locked" (SQLITE_BUSY / SQLITE_LOCKED).
                if message.contains("locked") || message.contains("busy") {
                    StoreError::transient(message)
                } else {
                    StoreError::permanent(message)
                }
            }
            _ => StoreError::permanent(err.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
