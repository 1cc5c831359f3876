//! Embedding generation for multilingual semantic search.
//!
//! The module uses a trait-based design so the model backend is swappable:
//!
//! ```text
//! EmbeddingModel (trait)
//!     └── CandleModel - Candle + HuggingFace sentence-transformer
//! EmbeddingService - validation, caching, batching, backpressure
//! EmbeddingCache (trait)
//!     ├── MemoryCache - in-process LRU
//!     └── RedisCache  - shared endpoint, per-op deadlines
//! ```

pub mod cache;
mod local;
mod model;
mod service;

pub use cache::{
    build_cache, cache_key, decode_entry, encode_entry, CacheStats, EmbeddingCache, MemoryCache,
    RedisCache,
};
pub use local::CandleModel;
pub use model::{EmbeddingModel, ModelStatus};
pub use service::EmbeddingService;
