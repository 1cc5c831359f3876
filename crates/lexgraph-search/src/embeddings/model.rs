//! Embedding model trait and status types.
//!
//! The capability boundary between the embedding service and the model
//! backend. Production uses the Candle-based [`super::CandleModel`]; tests
//! plug in a deterministic in-process model.

use async_trait::async_trait;

use crate::error::Result;

/// Status of an embedding model, used by diagnostics and the health probe.
#[derive(Debug, Clone)]
pub struct ModelStatus {
    /// Whether the model weights are loaded and ready for inference
    pub loaded: bool,
    /// Model identifier
    pub model_id: String,
    /// Output dimension
    pub dimension: usize,
    /// Device being used ("CPU", "Metal", "CUDA", "test")
    pub device: String,
    /// Error message if the model is unavailable
    pub error: Option<String>,
}

impl ModelStatus {
    /// Status for a ready model.
    pub fn ready(model_id: impl Into<String>, dimension: usize, device: impl Into<String>) -> Self {
        Self {
            loaded: true,
            model_id: model_id.into(),
            dimension,
            device: device.into(),
            error: None,
        }
    }

    /// Status for a model that cannot serve inference.
    pub fn unavailable(
        model_id: impl Into<String>,
        dimension: usize,
        error: impl Into<String>,
    ) -> Self {
        Self {
            loaded: false,
            model_id: model_id.into(),
            dimension,
            device: "N/A".into(),
            error: Some(error.into()),
        }
    }
}

/// A sentence-embedding model producing D-dimensional L2-normalized
/// vectors.
///
/// # Contract
///
/// - `encode` output order matches input order.
/// - Every returned vector has `dimension()` components and unit L2 norm.
/// - The model may be non-reentrant; callers serialize inference.
///
/// Implementations must be `Send + Sync`.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Encode a batch of texts into embeddings.
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// Model identifier (part of the cache key).
    fn model_id(&self) -> &str;

    /// Check model availability.
    async fn status(&self) -> ModelStatus;

    /// Load the model eagerly. Idempotent; repeated calls are no-ops once
    /// the model is loaded.
    async fn warmup(&self) -> Result<()>;
}
