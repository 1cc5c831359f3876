//! LexGraph Search - multilingual hybrid semantic search over a knowledge
//! graph
//!
//! The engine ingests text into embedded context chunks stored in a
//! property graph, and answers queries by combining vector similarity,
//! full-text matching, and short-range graph traversal.
//!
//! # Components
//!
//! - **Embedding service** - model lifecycle, batching, compressed cache
//! - **Ingestion pipeline** - normalize, chunk, detect, hash, embed, upsert
//! - **Search orchestrator** - strategy selection, RRF fusion, suggestions,
//!   graph expansion
//! - **Metrics & health** - counters, percentiles, connectivity probes
//!
//! # Example
//!
//! ```ignore
//! use lexgraph_config::ConfigLoader;
//! use lexgraph_search::{Engine, IngestRequest, SearchRequest, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     let engine = Engine::from_config(config).await?;
//!     engine.start().await?;
//!
//!     engine.ingest(IngestRequest {
//!         document: "Україна розвиває штучний інтелект.".into(),
//!         source_doc: "doc1".into(),
//!         language: Some("uk".into()),
//!         intents: vec![],
//!     }).await?;
//!
//!     let response = engine
//!         .search(SearchRequest::new("штучний інтелект").with_strategy(Strategy::Vector))
//!         .await?;
//!     println!("{} hits", response.total_results);
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod embeddings;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod search;

// Re-exports for convenience
pub use app::Engine;
pub use embeddings::{
    build_cache, CandleModel, EmbeddingCache, EmbeddingModel, EmbeddingService, MemoryCache,
    ModelStatus,
};
pub use error::{Result, SearchError};
pub use health::HealthReport;
pub use ingest::{
    CancelToken, ChunkFailure, IngestPipeline, IngestReport, IngestRequest, LanguageDetector,
    ScriptDetector,
};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use search::{
    SearchFilters, SearchOrchestrator, SearchRequest, SearchResponse, SearchResult, Strategy,
};
