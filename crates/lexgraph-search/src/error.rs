//! Error taxonomy for the search engine.
//!
//! Repositories classify and wrap low-level errors into this closed set;
//! services add context but do not translate further. The external adapter
//! maps these kinds onto transport codes.

use thiserror::Error;

use lexgraph_store::StoreError;

/// Errors surfaced by the engine API.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Validation failure. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding model failed to load or is not available.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model inference failure (after the single retry).
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Store failure with its transient/permanent classification.
    #[error("store error: {message}")]
    Store { transient: bool, message: String },

    /// Missing or degraded indexes; admin action required.
    #[error("schema error: {0}")]
    Schema(String),

    /// Deadline exceeded.
    #[error("operation '{op}' timed out")]
    Timeout { op: &'static str },

    /// Backpressure; caller may retry after the hint.
    #[error("overloaded, retry after {retry_after_ms} ms")]
    Overloaded { retry_after_ms: u64 },

    /// Entity lookup by id failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration failure at startup.
    #[error("configuration error: {0}")]
    Config(#[from] lexgraph_config::ConfigError),
}

impl SearchError {
    /// Stable label used for failure counters.
    pub fn kind_label(&self) -> &'static str {
        match self {
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::ModelUnavailable(_) => "model_unavailable",
            SearchError::EmbeddingFailed(_) => "embedding_failed",
            SearchError::Store { transient: true, .. } => "store_transient",
            SearchError::Store { transient: false, .. } => "store_permanent",
            SearchError::Schema(_) => "schema",
            SearchError::Timeout { .. } => "timeout",
            SearchError::Overloaded { .. } => "overloaded",
            SearchError::NotFound(_) => "not_found",
            SearchError::Config(_) => "config",
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Schema(message) => SearchError::Schema(message),
            StoreError::NotFound(message) => SearchError::NotFound(message),
            StoreError::Timeout { op } => SearchError::Timeout { op },
            StoreError::DimensionMismatch { expected, actual } => SearchError::Store {
                transient: false,
                message: format!("embedding dimension mismatch: expected {expected}, got {actual}"),
            },
            other => {
                let transient = other.is_transient();
                SearchError::Store {
                    transient,
                    message: other.to_string(),
                }
            }
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SearchError>;
