//! all-MiniLM-L6-v2 sentence embeddings
//!
//! ONNX inference through fastembed. Produces 384-dimensional vectors.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use std::path::Path;

use super::Embedder;
use crate::error::{QuestionBankError, Result};

/// Output dimension of all-MiniLM-L6-v2
pub const MINILM_DIMENSION: usize = 384;

/// Model identity recorded alongside stored embeddings
pub const MINILM_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// fastembed wrapper for all-MiniLM-L6-v2.
///
/// Calls into the ONNX session are serialized through the mutex.
pub struct MiniLmEmbedder {
    model: Mutex<TextEmbedding>,
}

impl MiniLmEmbedder {
    /// Load the model, downloading it into `cache_dir` on first use (~90MB)
    pub fn new(cache_dir: &Path) -> Result<Self> {
        log::info!("Loading {} from: {}", MINILM_MODEL_NAME, cache_dir.display());

        let opts = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(true);

        let model = TextEmbedding::try_new(opts)
            .map_err(|e| QuestionBankError::model(format!("Failed to load MiniLM: {}", e)))?;

        log::info!("Loaded {} ({}d)", MINILM_MODEL_NAME, MINILM_DIMENSION);

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for MiniLmEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.lock();
        model
            .embed(vec![text.to_string()], None)
            .map_err(|e| QuestionBankError::embedding(format!("Failed to encode text: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| QuestionBankError::embedding("model returned no embeddings"))
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn model_name(&self) -> &str {
        MINILM_MODEL_NAME
    }
}
