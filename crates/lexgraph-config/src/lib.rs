//! LexGraph configuration management.
//!
//! Provides a single strongly typed configuration record for the whole
//! engine, loaded from an optional TOML file with environment overrides
//! (`LEXGRAPH_*`) applied on top.
//!
//! Merge order: defaults → config file → environment.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};

/// Root configuration for the LexGraph engine.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LexConfig {
    /// Embedding model configuration
    pub model: ModelConfig,

    /// Graph store configuration
    pub store: StoreConfig,

    /// Embedding cache configuration
    pub cache: CacheConfig,

    /// Ingestion configuration
    pub ingest: IngestConfig,

    /// Search configuration
    pub search: SearchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Embedding model configuration.
///
/// # Example TOML
///
/// ```toml
/// [model]
/// model_id = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
/// embedding_dim = 384
/// batch_size = 32
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// HuggingFace model id of the sentence-embedding model
    pub model_id: String,

    /// Embedding dimension produced by the model
    pub embedding_dim: usize,

    /// Maximum number of texts in one inference call
    pub batch_size: usize,

    /// Maximum accepted input length in characters
    pub max_input_chars: usize,

    /// Queue depth above which embed requests are rejected as overloaded
    pub queue_high_watermark: usize,

    /// Inference deadline in milliseconds
    pub model_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            embedding_dim: 384,
            batch_size: 32,
            max_input_chars: 8192,
            queue_high_watermark: 256,
            model_timeout_ms: 30_000,
        }
    }
}

/// Graph store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store URI (e.g. "sqlite://lexgraph.db" or "sqlite::memory:")
    pub store_uri: String,

    /// Username for stores that require authentication.
    /// Ignored by the file-backed store.
    pub store_user: Option<String>,

    /// Password for stores that require authentication.
    /// Ignored by the file-backed store.
    pub store_password: Option<String>,

    /// Connection pool size
    pub pool_size: u32,

    /// Pool acquisition timeout in milliseconds
    pub pool_acquire_timeout_ms: u64,

    /// Per-query deadline in milliseconds
    pub store_query_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_uri: "sqlite://lexgraph.db".to_string(),
            store_user: None,
            store_password: None,
            pool_size: 8,
            pool_acquire_timeout_ms: 5_000,
            store_query_timeout_ms: 10_000,
        }
    }
}

/// Embedding cache configuration.
///
/// `cache_uri` selects the backend: `memory` for the in-process LRU cache,
/// a `redis://` URL for Redis, or `none` to disable caching entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache backend: "memory", "none", or a redis:// URL
    pub cache_uri: String,

    /// Entry time-to-live in seconds (0 = no expiry)
    pub cache_ttl_s: u64,

    /// Per-operation deadline in milliseconds
    pub cache_op_timeout_ms: u64,

    /// Maximum in-memory cache size in bytes
    pub max_memory_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_uri: "memory".to_string(),
            cache_ttl_s: 86_400,
            cache_op_timeout_ms: 500,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Whether caching is disabled.
    pub fn is_disabled(&self) -> bool {
        self.cache_uri.eq_ignore_ascii_case("none") || self.cache_uri.is_empty()
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Target chunk size in characters
    pub chunk_chars: usize,

    /// Overlap between consecutive chunks in characters
    pub overlap_chars: usize,

    /// Maximum chunks per write transaction
    pub tx_group_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 800,
            overlap_chars: 120,
            tx_group_size: 64,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// End-to-end query deadline in milliseconds
    pub query_timeout_ms: u64,

    /// Reciprocal rank fusion constant
    pub rrf_k: u32,

    /// Maximum allowed graph expansion depth
    pub graph_depth_max: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            rrf_k: 60,
            graph_depth_max: 3,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LexConfig {
    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.model_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "model.model_id must not be empty".to_string(),
            ));
        }
        if self.model.embedding_dim == 0 {
            return Err(ConfigError::ValidationError(
                "model.embedding_dim must be positive".to_string(),
            ));
        }
        if self.model.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "model.batch_size must be positive".to_string(),
            ));
        }
        if self.store.store_uri.is_empty() {
            return Err(ConfigError::ValidationError(
                "store.store_uri must not be empty".to_string(),
            ));
        }
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "store.pool_size must be positive".to_string(),
            ));
        }
        if self.ingest.overlap_chars >= self.ingest.chunk_chars {
            return Err(ConfigError::ValidationError(format!(
                "ingest.overlap_chars ({}) must be smaller than ingest.chunk_chars ({})",
                self.ingest.overlap_chars, self.ingest.chunk_chars
            )));
        }
        if !(1..=3).contains(&self.search.graph_depth_max) {
            return Err(ConfigError::ValidationError(
                "search.graph_depth_max must be within 1..=3".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.embedding_dim, 384);
        assert_eq!(config.search.rrf_k, 60);
        assert_eq!(config.cache.cache_uri, "memory");
    }

    #[test]
    fn test_validate_rejects_zero_dim() {
        let mut config = LexConfig::default();
        config.model.embedding_dim = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embedding_dim"));
    }

    #[test]
    fn test_validate_rejects_overlap_ge_chunk() {
        let mut config = LexConfig::default();
        config.ingest.chunk_chars = 100;
        config.ingest.overlap_chars = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_depth_out_of_range() {
        let mut config = LexConfig::default();
        config.search.graph_depth_max = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_disabled() {
        let mut config = LexConfig::default();
        assert!(!config.cache.is_disabled());
        config.cache.cache_uri = "none".to_string();
        assert!(config.cache.is_disabled());
        config.cache.cache_uri = String::new();
        assert!(config.cache.is_disabled());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = LexConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: LexConfig = toml_str.parse::<toml::Table>().unwrap().try_into().unwrap();
        assert_eq!(parsed.model.model_id, config.model.model_id);
        assert_eq!(parsed.store.pool_size, config.store.pool_size);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: LexConfig = toml::from_str(
            r#"
            [model]
            embedding_dim = 768

            [store]
            store_uri = "sqlite::memory:"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.model.embedding_dim, 768);
        assert_eq!(parsed.store.store_uri, "sqlite::memory:");
        // Untouched sections fall back to defaults
        assert_eq!(parsed.search.rrf_k, 60);
        assert_eq!(parsed.ingest.chunk_chars, 800);
    }
}
