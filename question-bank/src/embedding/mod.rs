//! Embedding module for semantic matching
//!
//! Uses all-MiniLM-L6-v2 (384 dimensions) through fastembed by default.
//! Anything implementing [`Embedder`] can stand in for it.

mod discovery;
mod engine;
mod minilm;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{find_model_cache_dir, MODELS_PATH_ENV};
pub use engine::EmbeddingEngine;
pub use minilm::{MiniLmEmbedder, MINILM_DIMENSION, MINILM_MODEL_NAME};

use crate::error::Result;

/// Text embedding provider.
///
/// Must be deterministic for identical input and must report failure
/// instead of returning a placeholder vector.
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Returns the embedding dimension
    fn dimension(&self) -> usize;

    /// Returns the model name/identifier
    fn model_name(&self) -> &str;
}
