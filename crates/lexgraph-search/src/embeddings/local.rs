//! Candle-based local embedding model.
//!
//! Runs a multilingual sentence-transformer BERT locally with mean pooling
//! and L2 normalization. GPU acceleration via compile-time features:
//! - `--features metal` for macOS Metal/MPS
//! - `--features cuda` for NVIDIA CUDA

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};
use tracing::{debug, info};

use crate::error::{Result, SearchError};

use super::model::{EmbeddingModel, ModelStatus};

/// Data type for model inference
const DTYPE: DType = DType::F32;

/// Local embedding model using Candle for inference.
///
/// Uses `Arc<CandleModelInner>` for interior clonability, which is required
/// for `spawn_blocking` to move the model handle into the blocking task.
/// Weights load lazily, exactly once, behind a `OnceCell`.
#[derive(Clone)]
pub struct CandleModel {
    inner: Arc<CandleModelInner>,
}

struct CandleModelInner {
    model_id: String,
    dimension: usize,
    loaded: OnceCell<LoadedModel>,
    device: Device,
}

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl CandleModel {
    /// Create a model handle. Weights load on first use or `warmup()`.
    ///
    /// Device is selected automatically: Metal > CUDA > CPU.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Result<Self> {
        let device = select_device()?;
        Ok(Self {
            inner: Arc::new(CandleModelInner {
                model_id: model_id.into(),
                dimension,
                loaded: OnceCell::new(),
                device,
            }),
        })
    }

    /// Get the device being used
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    fn device_name(&self) -> String {
        match &self.inner.device {
            Device::Cpu => "CPU".to_string(),
            #[cfg(feature = "metal")]
            Device::Metal(_) => "Metal".to_string(),
            #[cfg(feature = "cuda")]
            Device::Cuda(_) => "CUDA".to_string(),
            #[allow(unreachable_patterns)]
            _ => "Unknown".to_string(),
        }
    }

    /// Ensure the model is loaded (thread-safe lazy initialization)
    fn ensure_loaded(&self) -> Result<&LoadedModel> {
        self.inner
            .loaded
            .get_or_try_init(|| load_model(&self.inner.model_id, &self.inner.device))
    }

    /// Whether the weights are in memory.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get().is_some()
    }

    /// Synchronous encoding (internal)
    fn encode_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        debug!("Encoding {} texts with {}", texts.len(), self.inner.model_id);

        let loaded = self.ensure_loaded()?;
        let embeddings = encode_with_model(&loaded.model, &loaded.tokenizer, &loaded.device, &texts)?;

        for embedding in &embeddings {
            if embedding.len() != self.inner.dimension {
                return Err(SearchError::EmbeddingFailed(format!(
                    "model '{}' produced dimension {}, expected {}",
                    self.inner.model_id,
                    embedding.len(),
                    self.inner.dimension
                )));
            }
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingModel for CandleModel {
    async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.clone();
        tokio::task::spawn_blocking(move || model.encode_sync(&texts))
            .await
            .map_err(|e| SearchError::EmbeddingFailed(format!("blocking task panicked: {e}")))?
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }

    fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    async fn status(&self) -> ModelStatus {
        if self.is_loaded() {
            ModelStatus::ready(&self.inner.model_id, self.inner.dimension, self.device_name())
        } else {
            ModelStatus {
                loaded: false,
                model_id: self.inner.model_id.clone(),
                dimension: self.inner.dimension,
                device: self.device_name(),
                error: Some("model not loaded, call warmup()".to_string()),
            }
        }
    }

    async fn warmup(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let model = self.clone();
        let start = Instant::now();

        tokio::task::spawn_blocking(move || {
            model.ensure_loaded()?;
            Ok::<_, SearchError>(())
        })
        .await
        .map_err(|e| SearchError::ModelUnavailable(format!("warmup task panicked: {e}")))??;

        info!("Model warmup complete in {:?}", start.elapsed());
        Ok(())
    }
}

/// Select the best available device for inference
fn select_device() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Using Metal/MPS GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
            }
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("Using CUDA GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
            }
        }
    }

    info!("Using CPU (no GPU acceleration available)");
    Ok(Device::Cpu)
}

/// Download model files from HuggingFace Hub
fn download_model_files(model_id: &str) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let api = Api::new()
        .map_err(|e| SearchError::ModelUnavailable(format!("failed to create HF API: {e}")))?;
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    let api_repo = api.repo(repo);

    let config = api_repo.get("config.json").map_err(|e| {
        SearchError::ModelUnavailable(format!("failed to download config.json: {e}"))
    })?;
    let tokenizer = api_repo.get("tokenizer.json").map_err(|e| {
        SearchError::ModelUnavailable(format!("failed to download tokenizer.json: {e}"))
    })?;
    let weights = api_repo.get("model.safetensors").map_err(|e| {
        SearchError::ModelUnavailable(format!("failed to download model.safetensors: {e}"))
    })?;

    Ok((config, tokenizer, weights))
}

/// Load model weights and tokenizer
fn load_model(model_id: &str, device: &Device) -> Result<LoadedModel> {
    info!("Loading embedding model ({model_id})...");

    let (config_path, tokenizer_path, weights_path) = download_model_files(model_id)?;

    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| SearchError::ModelUnavailable(format!("failed to read config: {e}")))?;
    let config: BertConfig = serde_json::from_str(&config_str)
        .map_err(|e| SearchError::ModelUnavailable(format!("failed to parse config: {e}")))?;

    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| SearchError::ModelUnavailable(format!("failed to load tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)
            .map_err(|e| SearchError::ModelUnavailable(format!("failed to load weights: {e}")))?
    };

    let model = BertModel::load(vb, &config)
        .map_err(|e| SearchError::ModelUnavailable(format!("failed to create model: {e}")))?;

    info!("Embedding model loaded");

    Ok(LoadedModel {
        model,
        tokenizer,
        device: device.clone(),
    })
}

/// L2 normalize embeddings
fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)
        .map_err(|e| SearchError::EmbeddingFailed(format!("L2 normalization failed: {e}")))
}

/// Mean pooling with attention mask
fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let attention_mask_expanded = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;

    let sum_mask = attention_mask_expanded.sum(1)?;
    let masked_embeddings = embeddings.broadcast_mul(&attention_mask_expanded)?;
    let summed = masked_embeddings.sum(1)?;

    summed
        .broadcast_div(&sum_mask)
        .map_err(|e| SearchError::EmbeddingFailed(format!("mean pooling failed: {e}")))
}

/// Encode texts through the BERT model
fn encode_with_model(
    model: &BertModel,
    tokenizer: &Tokenizer,
    device: &Device,
    texts: &[&str],
) -> Result<Vec<Vec<f32>>> {
    let mut tokenizer = tokenizer.clone();
    let padding = PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    };
    tokenizer.with_padding(Some(padding));

    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| SearchError::EmbeddingFailed(format!("tokenization failed: {e}")))?;

    let token_ids: Vec<Tensor> = encodings
        .iter()
        .map(|enc| {
            let ids = enc.get_ids().to_vec();
            Tensor::new(ids.as_slice(), device)
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to create token tensor: {e}")))?;

    let attention_masks: Vec<Tensor> = encodings
        .iter()
        .map(|enc| {
            let mask = enc.get_attention_mask().to_vec();
            Tensor::new(mask.as_slice(), device)
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to create attention mask: {e}")))?;

    let token_ids = Tensor::stack(&token_ids, 0)
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to stack tokens: {e}")))?;
    let attention_mask = Tensor::stack(&attention_masks, 0)
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to stack masks: {e}")))?;
    let token_type_ids = token_ids
        .zeros_like()
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to build type ids: {e}")))?;

    let embeddings = model
        .forward(&token_ids, &token_type_ids, Some(&attention_mask))
        .map_err(|e| SearchError::EmbeddingFailed(format!("forward pass failed: {e}")))?;

    let pooled = mean_pool(&embeddings, &attention_mask)?;
    let normalized = normalize_l2(&pooled)?;

    let result: Vec<Vec<f32>> = (0..normalized.dim(0)?)
        .map(|i| normalized.get(i)?.to_vec1::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SearchError::EmbeddingFailed(format!("failed to convert embeddings: {e}")))?;

    Ok(result)
}

impl From<candle_core::Error> for SearchError {
    fn from(err: candle_core::Error) -> Self {
        SearchError::EmbeddingFailed(err.to_string())
    }
}
