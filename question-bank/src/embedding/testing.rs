//! Deterministic embedders for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Embedder;
use crate::error::{QuestionBankError, Result};

/// Bag-of-words hashing embedder.
///
/// Each lowercase word increments one FNV-1a bucket, so identical text maps
/// to identical vectors and shared words raise similarity. Fixed vectors can
/// be pinned per text.
pub struct HashEmbedder {
    dimension: usize,
    name: String,
    pinned: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    fail: bool,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            name: "hash-bow".to_string(),
            pinned: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            fail: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn pin(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension);
        self.pinned.insert(text.to_string(), vector);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared counter of `embed` invocations
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(QuestionBankError::embedding("test provider unavailable"));
        }
        if let Some(vector) = self.pinned.get(text) {
            return Ok(vector.clone());
        }

        let mut vector = vec![0.0_f32; self.dimension];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(word) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
