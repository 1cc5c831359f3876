//! Composition root.
//!
//! `Engine` wires configuration, pool, store, index manager, model, cache,
//! embedding service, ingestion pipeline, and orchestrator once at startup
//! and exposes the internal API surface consumed by external adapters.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use lexgraph_config::LexConfig;
use lexgraph_store::{
    GraphStore, IndexManager, SchemaReport, SqliteGraphStore, StoreCounts,
};

use crate::embeddings::{build_cache, CandleModel, EmbeddingModel, EmbeddingService};
use crate::error::Result;
use crate::health::HealthReport;
use crate::ingest::{CancelToken, IngestPipeline, IngestReport, IngestRequest, ScriptDetector};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::search::{SearchOrchestrator, SearchRequest, SearchResponse};

/// The assembled search engine.
#[derive(Clone)]
pub struct Engine {
    store: Arc<SqliteGraphStore>,
    index: Arc<IndexManager>,
    embedder: EmbeddingService,
    pipeline: IngestPipeline,
    orchestrator: SearchOrchestrator,
    metrics: Arc<MetricsRegistry>,
}

impl Engine {
    /// Build the engine with the Candle model named in configuration.
    pub async fn from_config(config: LexConfig) -> Result<Self> {
        config.validate()?;
        let model: Arc<dyn EmbeddingModel> = Arc::new(CandleModel::new(
            &config.model.model_id,
            config.model.embedding_dim,
        )?);
        Self::with_model(config, model).await
    }

    /// Build the engine around an explicit model. Tests inject a
    /// deterministic in-process model here.
    pub async fn with_model(config: LexConfig, model: Arc<dyn EmbeddingModel>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRegistry::new());

        let store = Arc::new(
            SqliteGraphStore::connect(&config.store, config.model.embedding_dim).await?,
        );
        let index = Arc::new(IndexManager::new(
            store.pool().clone(),
            config.model.embedding_dim,
        ));

        let cache = build_cache(&config.cache).await;
        let embedder = EmbeddingService::new(model, cache, config.model.clone(), metrics.clone())
            .with_cache_ttl(Duration::from_secs(config.cache.cache_ttl_s));

        let store_dyn: Arc<dyn GraphStore> = store.clone();
        let pipeline = IngestPipeline::new(
            store_dyn.clone(),
            embedder.clone(),
            Some(Arc::new(ScriptDetector::new())),
            config.ingest.clone(),
            metrics.clone(),
        );
        let orchestrator = SearchOrchestrator::new(
            store_dyn,
            embedder.clone(),
            config.search.clone(),
            metrics.clone(),
        );

        Ok(Self {
            store,
            index,
            embedder,
            pipeline,
            orchestrator,
            metrics,
        })
    }

    /// Bootstrap the schema and load the model. Safe to call repeatedly.
    pub async fn start(&self) -> Result<()> {
        self.index.bootstrap().await?;
        self.embedder.initialize().await?;
        info!("engine started");
        Ok(())
    }

    /// Execute a search request.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.record(self.orchestrator.search(request).await)
    }

    /// Intent-name suggestions for a prefix.
    pub async fn suggest(&self, prefix: &str) -> Result<Vec<String>> {
        self.record(self.orchestrator.suggest(prefix).await)
    }

    /// Ingest one document.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        self.record(self.pipeline.ingest(request).await)
    }

    /// Ingest with cooperative cancellation between chunk groups.
    pub async fn ingest_with_cancel(
        &self,
        request: IngestRequest,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        self.record(self.pipeline.ingest_with_cancel(request, cancel).await)
    }

    /// Admin: idempotent schema bootstrap.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.record(self.index.bootstrap().await.map_err(Into::into))
    }

    /// Admin: structured schema verification report.
    pub async fn verify_schema(&self) -> Result<SchemaReport> {
        self.record(self.index.verify().await.map_err(Into::into))
    }

    /// Admin: health probe.
    pub async fn health(&self) -> HealthReport {
        let model_loaded = self.embedder.model_status().await.loaded;
        let store_reachable = self.store.ping().await.is_ok();
        let schema_valid = self
            .index
            .verify()
            .await
            .map(|report| report.is_healthy())
            .unwrap_or(false);
        let cache_ok = self.embedder.cache_reachable().await;

        HealthReport::evaluate(model_loaded, store_reachable, schema_valid, cache_ok)
    }

    /// Admin: metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        let cache_stats = self.embedder.cache_stats();
        self.metrics
            .set_gauge("cache.backend_evictions", cache_stats.evictions as i64);
        self.metrics
            .set_gauge("cache.backend_errors", cache_stats.errors as i64);
        self.metrics
            .set_gauge("embed.queue_depth", self.embedder.queue_depth() as i64);

        let pool = self.store.pool();
        self.metrics
            .set_gauge("store.pool_connections", i64::from(pool.size()));
        self.metrics
            .set_gauge("store.pool_idle", pool.num_idle() as i64);

        self.metrics.snapshot(self.index.last_verified_at())
    }

    /// Node and edge counts for status reporting.
    pub async fn counts(&self) -> Result<StoreCounts> {
        Ok(self.store.counts().await?)
    }

    /// The embedding service (exposed for callers that need raw vectors).
    pub fn embedder(&self) -> &EmbeddingService {
        &self.embedder
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.metrics
                .incr(&format!("failures.{}", err.kind_label()));
        }
        result
    }
}
