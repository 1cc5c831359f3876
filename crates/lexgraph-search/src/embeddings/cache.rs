//! Embedding cache backends and wire codec.
//!
//! Cached values are `4-byte LE dimension prefix ‖ zstd(LE f32 bytes)`.
//! The prefix detects model changes: a dimension mismatch on read is a
//! cache miss and the entry is evicted. Cache failures never propagate;
//! they are logged and the caller recomputes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use lexgraph_config::CacheConfig;

/// Compression level for cached embeddings. Level 1 favors speed; the
/// float payloads are small.
const ZSTD_LEVEL: i32 = 1;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub errors: u64,
}

impl CacheStats {
    /// Hit ratio in [0, 1]; None before any traffic.
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// Compute the cache key for a (model, text) pair.
pub fn cache_key(model_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    format!("lexgraph:emb:{:x}", hasher.finalize())
}

/// Serialize an embedding into the cached wire format.
pub fn encode_entry(embedding: &[f32]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        raw.extend_from_slice(&val.to_le_bytes());
    }
    let compressed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).unwrap_or(raw);

    let mut entry = Vec::with_capacity(4 + compressed.len());
    entry.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    entry.extend_from_slice(&compressed);
    entry
}

/// Deserialize a cached entry, returning None on any mismatch or
/// corruption.
pub fn decode_entry(expected_dim: usize, entry: &[u8]) -> Option<Vec<f32>> {
    if entry.len() < 4 {
        return None;
    }
    let dim = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
    if dim != expected_dim {
        return None;
    }

    let raw = zstd::decode_all(&entry[4..]).ok()?;
    if raw.len() != dim * 4 {
        return None;
    }

    Some(
        raw.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Key-value cache for serialized embeddings.
///
/// Reads and writes are concurrent; implementations must swallow backend
/// failures (returning a miss or dropping the write) rather than
/// propagating them.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Fetch a cached entry. None on miss or backend failure.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store an entry. Failures are logged and dropped.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Remove an entry (used when a stale dimension is detected).
    async fn invalidate(&self, key: &str);

    /// Backend reachability probe.
    async fn ping(&self) -> bool;

    /// Counters for the metrics surface.
    fn stats(&self) -> CacheStats;
}

// ============================================================================
// In-memory LRU cache
// ============================================================================

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    last_accessed: Instant,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() > t).unwrap_or(false)
    }
}

/// In-process LRU cache bounded by total byte size.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    max_bytes: u64,
    current_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_bytes,
            current_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Evict least recently used entries until `needed` bytes fit.
    fn evict_lru(&self, needed: u64) {
        let mut entries = self.entries.write();
        let target = self.max_bytes.saturating_sub(needed);

        while self.current_bytes.load(Ordering::Relaxed) > target && !entries.is_empty() {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match lru_key {
                Some(key) => {
                    if let Some(entry) = entries.remove(&key) {
                        self.current_bytes
                            .fetch_sub(entry.value.len() as u64, Ordering::Relaxed);
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                if let Some(entry) = entries.remove(key) {
                    self.current_bytes
                        .fetch_sub(entry.value.len() as u64, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let size = value.len() as u64;
        if self.current_bytes.load(Ordering::Relaxed) + size > self.max_bytes {
            self.evict_lru(size);
        }

        let mut entries = self.entries.write();
        if let Some(old) = entries.remove(key) {
            self.current_bytes
                .fetch_sub(old.value.len() as u64, Ordering::Relaxed);
        }
        self.current_bytes.fetch_add(size, Ordering::Relaxed);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                last_accessed: Instant::now(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.remove(key) {
            self.current_bytes
                .fetch_sub(entry.value.len() as u64, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn ping(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: 0,
        }
    }
}

// ============================================================================
// Redis cache
// ============================================================================

/// Redis-backed cache with per-operation deadlines.
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
    op_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl RedisCache {
    /// Connect to the Redis endpoint.
    pub async fn connect(url: &str, op_timeout: Duration) -> Option<Self> {
        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                warn!("invalid redis url '{url}': {e}");
                return None;
            }
        };
        let manager = match tokio::time::timeout(
            op_timeout.max(Duration::from_secs(2)),
            client.get_connection_manager(),
        )
        .await
        {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => {
                warn!("redis connection failed: {e}");
                return None;
            }
            Err(_) => {
                warn!("redis connection timed out");
                return None;
            }
        };
        Some(Self {
            manager,
            op_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.manager.clone();
        let result: std::result::Result<std::result::Result<Option<Vec<u8>>, _>, _> =
            tokio::time::timeout(self.op_timeout, conn.get(key)).await;
        match result {
            Ok(Ok(Some(value))) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(Ok(None)) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(Err(e)) => {
                debug!("redis get failed: {e}");
                self.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(_) => {
                debug!("redis get timed out");
                self.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut conn = self.manager.clone();
        let result = match ttl {
            Some(ttl) if ttl.as_secs() > 0 => {
                tokio::time::timeout(
                    self.op_timeout,
                    conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()),
                )
                .await
            }
            _ => tokio::time::timeout(self.op_timeout, conn.set::<_, _, ()>(key, value)).await,
        };
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("redis set failed: {e}");
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                debug!("redis set timed out");
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn invalidate(&self, key: &str) {
        let mut conn = self.manager.clone();
        if let Ok(Err(e)) =
            tokio::time::timeout(self.op_timeout, conn.del::<_, ()>(key)).await
        {
            debug!("redis del failed: {e}");
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        matches!(
            tokio::time::timeout(
                self.op_timeout,
                redis::cmd("PING").query_async::<String>(&mut conn),
            )
            .await,
            Ok(Ok(_))
        )
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: 0,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Build the configured cache backend.
///
/// Returns None when caching is disabled or the backend is unreachable;
/// the engine degrades to uncached operation either way.
pub async fn build_cache(config: &CacheConfig) -> Option<std::sync::Arc<dyn EmbeddingCache>> {
    if config.is_disabled() {
        debug!("embedding cache disabled");
        return None;
    }
    let op_timeout = Duration::from_millis(config.cache_op_timeout_ms);

    if config.cache_uri.eq_ignore_ascii_case("memory") {
        return Some(std::sync::Arc::new(MemoryCache::new(config.max_memory_bytes)));
    }

    if config.cache_uri.starts_with("redis://") || config.cache_uri.starts_with("rediss://") {
        return match RedisCache::connect(&config.cache_uri, op_timeout).await {
            Some(cache) => Some(std::sync::Arc::new(cache)),
            None => {
                warn!("cache backend unreachable, continuing without cache");
                None
            }
        };
    }

    warn!(
        "unrecognized cache_uri '{}', continuing without cache",
        config.cache_uri
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip_is_bitwise() {
        let embedding = vec![0.1f32, -0.7, 3.5e-8, 1.0];
        let entry = encode_entry(&embedding);
        let decoded = decode_entry(4, &entry).unwrap();
        // Bitwise equality, not approximate
        for (a, b) in embedding.iter().zip(decoded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_codec_dimension_prefix() {
        let entry = encode_entry(&[1.0, 2.0, 3.0]);
        assert_eq!(&entry[..4], &3u32.to_le_bytes());
        // Wrong expected dimension is a miss
        assert!(decode_entry(4, &entry).is_none());
        assert!(decode_entry(3, &entry).is_some());
    }

    #[test]
    fn test_codec_rejects_corruption() {
        assert!(decode_entry(4, &[]).is_none());
        assert!(decode_entry(4, &[1, 2]).is_none());
        let mut entry = encode_entry(&[1.0, 2.0, 3.0, 4.0]);
        entry.truncate(6);
        assert!(decode_entry(4, &entry).is_none());
    }

    #[test]
    fn test_cache_key_depends_on_model_and_text() {
        let k1 = cache_key("model-a", "hello");
        let k2 = cache_key("model-a", "hello");
        let k3 = cache_key("model-b", "hello");
        let k4 = cache_key("model-a", "world");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);
    }

    #[tokio::test]
    async fn test_memory_cache_set_get() {
        let cache = MemoryCache::new(1024);
        assert!(cache.get("k").await.is_none());
        cache.set("k", vec![1, 2, 3], None).await;
        assert_eq!(cache.get("k").await.unwrap(), vec![1, 2, 3]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio(), Some(0.5));
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let cache = MemoryCache::new(1024);
        cache
            .set("k", vec![1], Some(Duration::from_nanos(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_lru_eviction() {
        let cache = MemoryCache::new(8);
        cache.set("a", vec![0; 4], None).await;
        cache.set("b", vec![0; 4], None).await;
        // Touch "b" so "a" is the LRU victim
        let _ = cache.get("b").await;
        cache.set("c", vec![0; 4], None).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.stats().evictions > 0);
    }

    #[tokio::test]
    async fn test_memory_cache_invalidate() {
        let cache = MemoryCache::new(1024);
        cache.set("k", vec![1], None).await;
        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_build_cache_disabled() {
        let config = CacheConfig {
            cache_uri: "none".into(),
            ..Default::default()
        };
        assert!(build_cache(&config).await.is_none());
    }

    #[tokio::test]
    async fn test_build_cache_memory() {
        let config = CacheConfig::default();
        assert!(build_cache(&config).await.is_some());
    }
}
