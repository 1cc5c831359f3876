//! LexGraph store - pooled async access to the property graph
//!
//! This crate owns node and edge state for the search engine: context
//! chunks with their embeddings, intents, the phase catalog, and the typed
//! relationships between them. It exposes vector similarity, full-text, and
//! bounded traversal queries over that state.
//!
//! # Example
//!
//! ```ignore
//! use lexgraph_store::{GraphStore, IndexManager, SqliteGraphStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteGraphStore::connect(&config.store, 384).await?;
//!
//!     // Schema must be online before any search is served
//!     let index = IndexManager::new(store.pool().clone(), 384);
//!     index.bootstrap().await?;
//!
//!     let hits = store.vector_query(&query_embedding, 10, &Default::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod index;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use error::{FailureKind, Result, StoreError};
pub use index::{IndexManager, ObjectReport, ObjectState, SchemaReport};
pub use pool::{create_memory_pool, create_pool, verify_connection};
pub use retry::{with_retry, RetryPolicy};
pub use schema::{SchemaObjectKind, REQUIRED_OBJECTS, SCHEMA_VERSION};
pub use store::{GraphStore, SqlRow, SqlValue, SqliteGraphStore};
pub use types::{
    blob_to_embedding, cosine_similarity, embedding_to_blob, rel, ChunkFilter, ContextChunk,
    Intent, IntentSpec, NodeRef, Phase, RelatedNode, ScoredChunk, StoreCounts, Subgraph,
    SubgraphEdge, UpsertOutcome,
};
