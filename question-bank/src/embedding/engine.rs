//! Embedding engine
//!
//! Wraps a provider with a bounded LRU cache and checks every vector it
//! hands out.

use super::Embedder;
use crate::error::{QuestionBankError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Cached embeddings kept by default
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Validating, caching embedding engine
///
/// Rejects blank input and any vector whose length differs from the
/// provider's declared dimension or that contains non-finite values.
pub struct EmbeddingEngine {
    provider: Box<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    dimension: usize,
}

impl EmbeddingEngine {
    pub fn new(provider: impl Embedder + 'static) -> Self {
        Self::with_cache_capacity(provider, DEFAULT_CACHE_CAPACITY)
    }

    /// Engine keeping at most `capacity` embeddings (minimum 1)
    pub fn with_cache_capacity(provider: impl Embedder + 'static, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let dimension = provider.dimension();
        log::info!(
            "EmbeddingEngine ready ({}, {}d, cache {})",
            provider.model_name(),
            dimension,
            capacity
        );

        Self {
            provider: Box::new(provider),
            cache: Mutex::new(LruCache::new(capacity)),
            dimension,
        }
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.lock().len()
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(QuestionBankError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(QuestionBankError::embedding(
                "provider returned non-finite values",
            ));
        }
        Ok(())
    }
}

impl Embedder for EmbeddingEngine {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(QuestionBankError::embedding("cannot embed empty text"));
        }

        if let Some(cached) = self.cache.lock().get(text) {
            return Ok(cached.clone());
        }

        // Provider runs outside the lock
        let embedding = self.provider.embed(text)?;
        self.check(&embedding)?;
        self.cache.lock().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}
