//! Local sentence-transformer embeddings via fastembed (bundled ONNX Runtime).
//!
//! The model is downloaded from Hugging Face on first use and cached; after
//! that, embedding runs entirely offline.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{Result, RetrievalError};

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub struct FastEmbedEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Mutex<TextEmbedding>,
}

impl FastEmbedEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let (model_id, dims) = resolve_model(&model_name)?;

        info!(model = %model_name, dims, "loading local embedding model");
        let model = TextEmbedding::try_new(
            InitOptions::new(model_id).with_show_download_progress(true),
        )
        .map_err(|e| {
            RetrievalError::Embedding(format!("failed to initialize local model: {}", e))
        })?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| RetrievalError::Embedding("model lock poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| RetrievalError::Embedding(format!("local embedding failed: {}", e)))
    }
}

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        other => Err(RetrievalError::InvalidInput(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base",
            other
        ))),
    }
}
