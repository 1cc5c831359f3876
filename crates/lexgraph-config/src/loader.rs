//! Configuration loader.
//!
//! Loads configuration from an optional TOML file, then applies
//! `LEXGRAPH_*` environment overrides. Later sources override earlier ones.

use crate::error::ConfigError;
use crate::LexConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name looked up in the working directory when no
/// explicit path is given.
const CONFIG_FILE_NAME: &str = "lexgraph.toml";

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "LEXGRAPH_";

/// Configuration loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Explicit config file path (overrides the default lookup)
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader using the default file lookup (`./lexgraph.toml`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with an explicit config file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load and validate the fully merged configuration.
    pub fn load(&self) -> Result<LexConfig, ConfigError> {
        let mut config = match self.resolve_path() {
            Some(path) if path.exists() => {
                debug!("Loading config from {:?}", path);
                load_config_file(&path)?
            }
            Some(path) => {
                trace!("Config file not found at {:?}, using defaults", path);
                LexConfig::default()
            }
            None => LexConfig::default(),
        };

        apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        self.config_path
            .clone()
            .or_else(|| Some(PathBuf::from(CONFIG_FILE_NAME)))
    }
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<LexConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Apply environment overrides onto a configuration.
///
/// `lookup` abstracts `std::env::var` so tests can inject values without
/// mutating process state.
pub fn apply_env_overrides<F>(config: &mut LexConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn var_name(key: &str) -> String {
        format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())
    }

    fn parse<T: std::str::FromStr>(var: &str, raw: String) -> Result<T, ConfigError> {
        raw.parse()
            .map_err(|_| ConfigError::invalid_env(var, format!("cannot parse '{raw}'")))
    }

    macro_rules! override_str {
        ($field:expr, $key:literal) => {
            if let Some(raw) = lookup(&var_name($key)) {
                $field = raw;
            }
        };
    }
    macro_rules! override_parsed {
        ($field:expr, $key:literal) => {
            if let Some(raw) = lookup(&var_name($key)) {
                $field = parse(&var_name($key), raw)?;
            }
        };
    }

    override_str!(config.model.model_id, "model_id");
    override_parsed!(config.model.embedding_dim, "embedding_dim");
    override_parsed!(config.model.batch_size, "batch_size");
    override_parsed!(config.model.max_input_chars, "max_input_chars");
    override_parsed!(config.model.queue_high_watermark, "queue_high_watermark");
    override_parsed!(config.model.model_timeout_ms, "model_timeout_ms");

    override_str!(config.store.store_uri, "store_uri");
    if let Some(raw) = lookup(&var_name("store_user")) {
        config.store.store_user = Some(raw);
    }
    if let Some(raw) = lookup(&var_name("store_password")) {
        config.store.store_password = Some(raw);
    }
    override_parsed!(config.store.pool_size, "pool_size");
    override_parsed!(config.store.pool_acquire_timeout_ms, "pool_acquire_timeout_ms");
    override_parsed!(config.store.store_query_timeout_ms, "store_query_timeout_ms");

    override_str!(config.cache.cache_uri, "cache_uri");
    override_parsed!(config.cache.cache_ttl_s, "cache_ttl_s");
    override_parsed!(config.cache.cache_op_timeout_ms, "cache_op_timeout_ms");

    override_parsed!(config.ingest.chunk_chars, "chunk_chars");
    override_parsed!(config.ingest.overlap_chars, "overlap_chars");

    override_parsed!(config.search.query_timeout_ms, "query_timeout_ms");
    override_parsed!(config.search.rrf_k, "rrf_k");
    override_parsed!(config.search.graph_depth_max, "graph_depth_max");

    override_str!(config.logging.level, "log_level");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |var| map.get(var).map(|v| v.to_string())
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/lexgraph.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.model.embedding_dim, 384);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [model]
            model_id = "intfloat/multilingual-e5-small"
            embedding_dim = 384

            [search]
            rrf_k = 30
            "#
        )
        .unwrap();

        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();
        assert_eq!(config.model.model_id, "intfloat/multilingual-e5-small");
        assert_eq!(config.search.rrf_k, 30);
        // Unset keys keep defaults
        assert_eq!(config.store.pool_size, 8);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LexConfig::default();
        let vars = HashMap::from([
            ("LEXGRAPH_STORE_URI", "sqlite::memory:"),
            ("LEXGRAPH_POOL_SIZE", "2"),
            ("LEXGRAPH_RRF_K", "10"),
            ("LEXGRAPH_CACHE_URI", "redis://localhost:6379"),
        ]);

        apply_env_overrides(&mut config, lookup_from(&vars)).unwrap();

        assert_eq!(config.store.store_uri, "sqlite::memory:");
        assert_eq!(config.store.pool_size, 2);
        assert_eq!(config.search.rrf_k, 10);
        assert_eq!(config.cache.cache_uri, "redis://localhost:6379");
    }

    #[test]
    fn test_env_override_bad_value() {
        let mut config = LexConfig::default();
        let vars = HashMap::from([("LEXGRAPH_POOL_SIZE", "many")]);

        let err = apply_env_overrides(&mut config, lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("LEXGRAPH_POOL_SIZE"));
    }

    #[test]
    fn test_env_credentials() {
        let mut config = LexConfig::default();
        let vars = HashMap::from([
            ("LEXGRAPH_STORE_USER", "svc"),
            ("LEXGRAPH_STORE_PASSWORD", "secret"),
        ]);

        apply_env_overrides(&mut config, lookup_from(&vars)).unwrap();
        assert_eq!(config.store.store_user.as_deref(), Some("svc"));
        assert_eq!(config.store.store_password.as_deref(), Some("secret"));
    }
}
