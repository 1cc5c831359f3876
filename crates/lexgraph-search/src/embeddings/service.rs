//! Embedding service: validation, caching, batching, and backpressure on
//! top of an [`EmbeddingModel`].
//!
//! The model may be non-reentrant, so all inference is serialized through
//! a single async lock; admission is bounded by a semaphore sized to
//! `queue_high_watermark`, and a full queue rejects with `Overloaded`
//! instead of blocking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use lexgraph_config::ModelConfig;

use crate::error::{Result, SearchError};
use crate::metrics::MetricsRegistry;

use super::cache::{cache_key, decode_entry, encode_entry, CacheStats, EmbeddingCache};
use super::model::{EmbeddingModel, ModelStatus};

/// Retry-after hint returned with `Overloaded`.
const RETRY_AFTER_MS: u64 = 100;

/// Embedding service over a single sentence-embedding model.
#[derive(Clone)]
pub struct EmbeddingService {
    model: Arc<dyn EmbeddingModel>,
    cache: Option<Arc<dyn EmbeddingCache>>,
    config: ModelConfig,
    metrics: Arc<MetricsRegistry>,
    cache_ttl: Duration,
    queue: Arc<Semaphore>,
    inference_lock: Arc<Mutex<()>>,
}

impl EmbeddingService {
    pub fn new(
        model: Arc<dyn EmbeddingModel>,
        cache: Option<Arc<dyn EmbeddingCache>>,
        config: ModelConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let queue = Arc::new(Semaphore::new(config.queue_high_watermark));
        Self {
            model,
            cache,
            config,
            metrics,
            cache_ttl: Duration::ZERO,
            queue,
            inference_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Set the cache entry time-to-live (zero = no expiry).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Load the model. Idempotent; repeated calls are no-ops once loaded.
    pub async fn initialize(&self) -> Result<()> {
        self.model.warmup().await
    }

    /// Embedding dimension D.
    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    /// Model status for diagnostics and health.
    pub async fn model_status(&self) -> ModelStatus {
        self.model.status().await
    }

    /// Whether a cache backend is attached.
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cache backend reachability (true when no cache is configured).
    pub async fn cache_reachable(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.ping().await,
            None => true,
        }
    }

    /// Cache counters for the metrics surface.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .as_ref()
            .map(|c| c.stats())
            .unwrap_or_default()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.validate_text(text)?;
        let mut result = self.embed_batch(vec![text.to_string()], true).await?;
        Ok(result.pop().expect("embed_batch returned empty result"))
    }

    /// Embed a batch of texts; output order matches input order.
    ///
    /// With `strict = true`, an empty or over-long element fails the whole
    /// batch with `InvalidInput`. Otherwise such elements are substituted
    /// with a zero vector and counted in metrics.
    pub async fn embed_batch(&self, texts: Vec<String>, strict: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _permit = self.admit()?;
        self.metrics.incr("embed.requests");

        let dim = self.model.dimension();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.validate_text(text) {
                Ok(()) => pending.push((i, text.clone())),
                Err(err) if strict => return Err(err),
                Err(_) => {
                    self.metrics.incr("embed.zero_substituted");
                    results[i] = Some(vec![0.0; dim]);
                }
            }
        }

        // Split into cache-hit and cache-miss partitions
        let mut misses: Vec<(usize, String)> = Vec::new();
        for (i, text) in pending {
            match self.cache_lookup(&text).await {
                Some(embedding) => results[i] = Some(embedding),
                None => misses.push((i, text)),
            }
        }

        // Compute the miss partition, one sub-batch at a time
        for sub_batch in misses.chunks(self.config.batch_size) {
            let batch_texts: Vec<String> = sub_batch.iter().map(|(_, t)| t.clone()).collect();
            let embeddings = self.infer(batch_texts).await?;

            if embeddings.len() != sub_batch.len() {
                return Err(SearchError::EmbeddingFailed(format!(
                    "model returned {} embeddings for {} inputs",
                    embeddings.len(),
                    sub_batch.len()
                )));
            }

            for ((i, text), embedding) in sub_batch.iter().zip(embeddings) {
                if embedding.len() != dim {
                    return Err(SearchError::EmbeddingFailed(format!(
                        "model produced dimension {}, expected {dim}",
                        embedding.len()
                    )));
                }
                self.cache_store(text, &embedding);
                results[*i] = Some(embedding);
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("every slot filled"))
            .collect())
    }

    /// Cosine similarity between two embeddings.
    ///
    /// Vectors from this service are L2-normalized, so this is the inner
    /// product, clamped against float drift.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        dot.clamp(-1.0, 1.0)
    }

    /// The `k` candidates most similar to `query`, best first, ties broken
    /// by lower index.
    pub fn most_similar(
        &self,
        query: &[f32],
        candidates: &[Vec<f32>],
        k: usize,
    ) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.similarity(query, c)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Current admission queue depth.
    pub fn queue_depth(&self) -> usize {
        self.config
            .queue_high_watermark
            .saturating_sub(self.queue.available_permits())
    }

    fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SearchError::InvalidInput("text must not be empty".into()));
        }
        let chars = text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(SearchError::InvalidInput(format!(
                "text length {chars} exceeds max_input_chars {}",
                self.config.max_input_chars
            )));
        }
        Ok(())
    }

    /// Non-blocking admission: a full queue rejects immediately.
    fn admit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        let permit = self.queue.clone().try_acquire_owned().map_err(|_| {
            self.metrics.incr("embed.overloaded");
            SearchError::Overloaded {
                retry_after_ms: RETRY_AFTER_MS,
            }
        })?;
        self.metrics
            .set_gauge("embed.queue_depth", self.queue_depth() as i64);
        Ok(permit)
    }

    async fn cache_lookup(&self, text: &str) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        let key = cache_key(self.model.model_id(), text.trim());
        let entry = cache.get(&key).await?;

        match decode_entry(self.model.dimension(), &entry) {
            Some(embedding) => {
                self.metrics.incr("cache.hits");
                Some(embedding)
            }
            None => {
                // Stale entry from a different model dimension; the
                // recompute path counts the miss.
                debug!("evicting cache entry with mismatched dimension");
                cache.invalidate(&key).await;
                None
            }
        }
    }

    /// Fire-and-forget cache write; in-flight writes complete even if the
    /// calling request is cancelled.
    fn cache_store(&self, text: &str, embedding: &[f32]) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        self.metrics.incr("cache.misses");
        let key = cache_key(self.model.model_id(), text.trim());
        let entry = encode_entry(embedding);
        let ttl = if self.cache_ttl.is_zero() {
            None
        } else {
            Some(self.cache_ttl)
        };
        tokio::spawn(async move {
            cache.set(&key, entry, ttl).await;
        });
    }

    /// Serialized inference with deadline and single retry.
    async fn infer(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let deadline = Duration::from_millis(self.config.model_timeout_ms);

        let run = || async {
            let _guard = self.inference_lock.lock().await;
            tokio::time::timeout(deadline, self.model.encode(texts.clone()))
                .await
                .map_err(|_| SearchError::Timeout { op: "embed" })?
        };

        match run().await {
            Err(SearchError::EmbeddingFailed(first)) => {
                warn!("embedding failed, retrying once: {first}");
                self.metrics.incr("embed.retries");
                run().await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cache::MemoryCache;
    use crate::embeddings::model::ModelStatus;
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicU64, Ordering};

    const DIM: usize = 8;

    /// Deterministic model: vectors derive from a content hash, then get
    /// L2-normalized. Counts inference calls for cache assertions.
    struct StubModel {
        calls: AtomicU64,
        fail_first: AtomicU64,
    }

    impl StubModel {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail_first: AtomicU64::new(0),
            }
        }

        fn failing_once() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail_first: AtomicU64::new(1),
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            let digest = Sha256::digest(text.as_bytes());
            let mut v: Vec<f32> = digest[..DIM]
                .iter()
                .map(|&b| f32::from(b) + 1.0)
                .collect();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in &mut v {
                *x /= norm;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingModel for StubModel {
        async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.swap(0, Ordering::SeqCst) > 0 {
                return Err(SearchError::EmbeddingFailed("induced failure".into()));
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_id(&self) -> &str {
            "stub-model"
        }

        async fn status(&self) -> ModelStatus {
            ModelStatus::ready("stub-model", DIM, "test")
        }

        async fn warmup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn service_with(model: StubModel, cache: bool) -> (EmbeddingService, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache: Option<Arc<dyn EmbeddingCache>> = if cache {
            Some(Arc::new(MemoryCache::new(1024 * 1024)))
        } else {
            None
        };
        let config = ModelConfig {
            batch_size: 2,
            max_input_chars: 64,
            queue_high_watermark: 4,
            ..Default::default()
        };
        (
            EmbeddingService::new(Arc::new(model), cache, config, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn embed_rejects_empty_and_overlong() {
        let (service, _) = service_with(StubModel::new(), false);
        assert!(matches!(
            service.embed("").await.unwrap_err(),
            SearchError::InvalidInput(_)
        ));
        assert!(matches!(
            service.embed("   ").await.unwrap_err(),
            SearchError::InvalidInput(_)
        ));
        let long = "x".repeat(65);
        assert!(matches!(
            service.embed(&long).await.unwrap_err(),
            SearchError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn embed_returns_normalized_vector() {
        let (service, _) = service_with(StubModel::new(), false);
        let v = service.embed("hello world").await.unwrap();
        assert_eq!(v.len(), DIM);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn second_embed_is_a_cache_hit_and_bitwise_identical() {
        let (service, metrics) = service_with(StubModel::new(), true);
        let first = service.embed("hello").await.unwrap();
        // Let the fire-and-forget cache write land
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = service.embed("hello").await.unwrap();
        assert_eq!(metrics.counter("cache.hits"), 1);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[tokio::test]
    async fn batch_preserves_input_order_and_subbatches() {
        let (service, _) = service_with(StubModel::new(), false);
        let texts: Vec<String> = (0..5).map(|i| format!("text number {i}")).collect();
        let embeddings = service.embed_batch(texts.clone(), true).await.unwrap();
        assert_eq!(embeddings.len(), 5);
        for (text, embedding) in texts.iter().zip(&embeddings) {
            assert_eq!(embedding, &StubModel::vector_for(text));
        }
    }

    #[tokio::test]
    async fn batch_strict_rejects_empty_element() {
        let (service, _) = service_with(StubModel::new(), false);
        let err = service
            .embed_batch(vec!["ok".into(), "".into()], true)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn batch_lenient_substitutes_zero_vectors() {
        let (service, metrics) = service_with(StubModel::new(), false);
        let embeddings = service
            .embed_batch(vec!["ok".into(), "".into()], false)
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings[1].iter().all(|&x| x == 0.0));
        assert_eq!(metrics.counter("embed.zero_substituted"), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_retried_once() {
        let (service, metrics) = service_with(StubModel::failing_once(), false);
        let v = service.embed("retry me").await.unwrap();
        assert_eq!(v.len(), DIM);
        assert_eq!(metrics.counter("embed.retries"), 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let (service, metrics) = service_with(StubModel::new(), false);
        // Drain all admission permits
        let permits: Vec<_> = (0..4).map(|_| service.admit().unwrap()).collect();

        let started = std::time::Instant::now();
        let err = service.embed("blocked").await.unwrap_err();
        assert!(matches!(err, SearchError::Overloaded { retry_after_ms } if retry_after_ms > 0));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(metrics.counter("embed.overloaded"), 1);
        drop(permits);

        // Queue drains, requests are admitted again
        assert!(service.embed("unblocked").await.is_ok());
    }

    #[tokio::test]
    async fn most_similar_orders_and_breaks_ties_by_index() {
        let (service, _) = service_with(StubModel::new(), false);
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0],  // orthogonal
            vec![1.0, 0.0],  // identical
            vec![1.0, 0.0],  // identical (tie with index 1)
        ];
        let top = service.most_similar(&query, &candidates, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, 1);
        assert_eq!(top[1].0, 2);
        assert!((top[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn similarity_is_clamped() {
        let (service, _) = service_with(StubModel::new(), false);
        // Denormalized input would exceed 1.0 without the clamp
        let s = service.similarity(&[2.0, 0.0], &[2.0, 0.0]);
        assert!((s - 1.0).abs() < 1e-6);
        assert_eq!(service.similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
