//! Shared test fixtures: a deterministic embedding model and a
//! latency-injecting store wrapper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use lexgraph_config::{IngestConfig, ModelConfig, SearchConfig};
use lexgraph_search::embeddings::MemoryCache;
use lexgraph_search::ingest::{IngestPipeline, ScriptDetector};
use lexgraph_search::search::SearchOrchestrator;
use lexgraph_search::{EmbeddingModel, EmbeddingService, MetricsRegistry, ModelStatus};
use lexgraph_store::{
    ChunkFilter, ContextChunk, GraphStore, IndexManager, Intent, IntentSpec, NodeRef, Phase,
    ScoredChunk, SqlRow, SqlValue, SqliteGraphStore, StoreCounts, Subgraph, UpsertOutcome,
};

/// Embedding dimension used across the integration tests.
pub const DIM: usize = 64;

/// Deterministic bag-of-words model: each token maps to a fixed basis
/// slot, the text vector is the L2-normalized sum. Texts sharing tokens
/// get high cosine similarity, which is enough to exercise ranking.
pub struct TestModel;

impl TestModel {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let slot = (u16::from(digest[0]) << 8 | u16::from(digest[1])) as usize % DIM;
            v[slot] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingModel for TestModel {
    async fn encode(
        &self,
        texts: Vec<String>,
    ) -> lexgraph_search::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        "test-bag-of-words"
    }

    async fn status(&self) -> ModelStatus {
        ModelStatus::ready("test-bag-of-words", DIM, "test")
    }

    async fn warmup(&self) -> lexgraph_search::Result<()> {
        Ok(())
    }
}

/// Store wrapper that delays fulltext queries, for deadline tests. It
/// implements the same [`GraphStore`] contract as the real adapter.
pub struct SlowFulltextStore {
    pub inner: Arc<dyn GraphStore>,
    pub fulltext_delay: Duration,
}

#[async_trait]
impl GraphStore for SlowFulltextStore {
    async fn execute_read(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> lexgraph_store::Result<Vec<SqlRow>> {
        self.inner.execute_read(query, params).await
    }

    async fn execute_write(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> lexgraph_store::Result<Vec<SqlRow>> {
        self.inner.execute_write(query, params).await
    }

    async fn upsert_chunk(&self, chunk: &ContextChunk) -> lexgraph_store::Result<UpsertOutcome> {
        self.inner.upsert_chunk(chunk).await
    }

    async fn upsert_chunk_group(
        &self,
        chunks: &[ContextChunk],
    ) -> lexgraph_store::Result<Vec<UpsertOutcome>> {
        self.inner.upsert_chunk_group(chunks).await
    }

    async fn upsert_intent(&self, intent: &IntentSpec) -> lexgraph_store::Result<UpsertOutcome> {
        self.inner.upsert_intent(intent).await
    }

    async fn upsert_phase(&self, phase: &Phase) -> lexgraph_store::Result<UpsertOutcome> {
        self.inner.upsert_phase(phase).await
    }

    async fn link(
        &self,
        src: &NodeRef,
        rel_type: &str,
        dst: &NodeRef,
        props: serde_json::Value,
    ) -> lexgraph_store::Result<()> {
        self.inner.link(src, rel_type, dst, props).await
    }

    async fn vector_query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> lexgraph_store::Result<Vec<ScoredChunk>> {
        self.inner.vector_query(embedding, k, filter).await
    }

    async fn fulltext_query(
        &self,
        text: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> lexgraph_store::Result<Vec<ScoredChunk>> {
        tokio::time::sleep(self.fulltext_delay).await;
        self.inner.fulltext_query(text, k, filter).await
    }

    async fn neighbors(
        &self,
        origin: &NodeRef,
        depth: usize,
        rel_types: &[&str],
    ) -> lexgraph_store::Result<Subgraph> {
        self.inner.neighbors(origin, depth, rel_types).await
    }

    async fn chunk_by_hash(&self, chunk_hash: &str) -> lexgraph_store::Result<ContextChunk> {
        self.inner.chunk_by_hash(chunk_hash).await
    }

    async fn intent_by_name(&self, name: &str, lang: &str) -> lexgraph_store::Result<Intent> {
        self.inner.intent_by_name(name, lang).await
    }

    async fn intent_fulltext(&self, text: &str, k: usize) -> lexgraph_store::Result<Vec<Intent>> {
        self.inner.intent_fulltext(text, k).await
    }

    async fn chunks_detailing(
        &self,
        intent: &NodeRef,
    ) -> lexgraph_store::Result<Vec<ContextChunk>> {
        self.inner.chunks_detailing(intent).await
    }

    async fn suggest_intents(
        &self,
        prefix: &str,
        limit: usize,
    ) -> lexgraph_store::Result<Vec<String>> {
        self.inner.suggest_intents(prefix, limit).await
    }

    async fn counts(&self) -> lexgraph_store::Result<StoreCounts> {
        self.inner.counts().await
    }

    async fn ping(&self) -> lexgraph_store::Result<()> {
        self.inner.ping().await
    }
}

/// Hand-assembled engine internals with direct store access.
pub struct TestHarness {
    pub store: Arc<SqliteGraphStore>,
    pub embedder: EmbeddingService,
    pub pipeline: IngestPipeline,
    pub orchestrator: SearchOrchestrator,
    pub metrics: Arc<MetricsRegistry>,
}

/// Build a harness over a fresh in-memory store.
pub async fn harness() -> TestHarness {
    harness_with(SearchConfig::default(), None).await
}

/// Build a harness, optionally wrapping the store seen by the
/// orchestrator (the pipeline always writes through the real one).
pub async fn harness_with(
    search_config: SearchConfig,
    wrap: Option<Box<dyn Fn(Arc<dyn GraphStore>) -> Arc<dyn GraphStore>>>,
) -> TestHarness {
    let pool = lexgraph_store::create_memory_pool().await.unwrap();
    let index = IndexManager::new(pool.clone(), DIM);
    index.bootstrap().await.unwrap();

    let store = Arc::new(SqliteGraphStore::from_pool(pool, 5_000, DIM));
    let metrics = Arc::new(MetricsRegistry::new());

    let model_config = ModelConfig {
        embedding_dim: DIM,
        batch_size: 8,
        ..Default::default()
    };
    let embedder = EmbeddingService::new(
        Arc::new(TestModel),
        Some(Arc::new(MemoryCache::new(1024 * 1024))),
        model_config,
        metrics.clone(),
    );

    let store_dyn: Arc<dyn GraphStore> = store.clone();
    let search_store = match wrap {
        Some(wrap) => wrap(store_dyn.clone()),
        None => store_dyn.clone(),
    };

    let pipeline = IngestPipeline::new(
        store_dyn,
        embedder.clone(),
        Some(Arc::new(ScriptDetector::new())),
        IngestConfig {
            chunk_chars: 200,
            overlap_chars: 20,
            ..Default::default()
        },
        metrics.clone(),
    );
    let orchestrator =
        SearchOrchestrator::new(search_store, embedder.clone(), search_config, metrics.clone());

    TestHarness {
        store,
        embedder,
        pipeline,
        orchestrator,
        metrics,
    }
}
