//! In-memory cosine similarity index
//!
//! A read-only snapshot: the questions plus one row-major `[len, dimension]`
//! matrix of their embeddings. Row `i` belongs to question `i`. New questions
//! only show up after a fresh `build`.

use crate::error::{QuestionBankError, Result};
use crate::question::Question;

/// A ranked row of the index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedIndex {
    /// Row in the snapshot
    pub index: usize,
    /// Cosine similarity, -1.0 to 1.0
    pub score: f32,
}

/// Snapshot of stored questions with their embedding matrix
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    questions: Vec<Question>,
    matrix: Vec<f32>,
    norms: Vec<f64>,
    dimension: usize,
}

impl SimilarityIndex {
    /// Index with no rows; every query returns nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Stack all embeddings into a single matrix.
    ///
    /// Every embedding must have the length of the first one. An empty
    /// question list yields the empty index.
    pub fn build(questions: Vec<Question>) -> Result<Self> {
        let Some(first) = questions.first() else {
            return Ok(Self::empty());
        };
        let dimension = first.embedding.len();
        if dimension == 0 {
            return Err(QuestionBankError::corrupt_embedding(
                first.id.0,
                "embedding is empty",
            ));
        }

        let mut matrix = Vec::with_capacity(questions.len() * dimension);
        let mut norms = Vec::with_capacity(questions.len());
        for question in &questions {
            if question.embedding.len() != dimension {
                return Err(QuestionBankError::DimensionMismatch {
                    expected: dimension,
                    actual: question.embedding.len(),
                });
            }
            matrix.extend_from_slice(&question.embedding);
            norms.push(l2_norm(&question.embedding));
        }

        log::debug!(
            "Built similarity index: {} rows x {} columns",
            questions.len(),
            dimension
        );

        Ok(Self {
            questions,
            matrix,
            norms,
            dimension,
        })
    }

    /// Rank rows by cosine similarity to `query`.
    ///
    /// Returns at most `k` rows, highest score first, equal scores in row
    /// order. Zero-norm vectors score 0.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<RankedIndex>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(QuestionBankError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        let mut ranked: Vec<RankedIndex> = (0..self.len())
            .map(|index| RankedIndex {
                index,
                score: cosine(query, query_norm, self.row(index), self.norms[index]),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Embedding row `index`
    pub fn row(&self, index: usize) -> &[f32] {
        &self.matrix[index * self.dimension..(index + 1) * self.dimension]
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Column count, `None` for the empty index
    pub fn dimension(&self) -> Option<usize> {
        (!self.is_empty()).then_some(self.dimension)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

// Accumulated in f64: squares of large finite f32 values overflow f32.
fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

fn cosine(query: &[f32], query_norm: f64, row: &[f32], row_norm: f64) -> f32 {
    if query_norm == 0.0 || row_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = query
        .iter()
        .zip(row)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    let score = dot / (query_norm * row_norm);
    if score.is_finite() {
        score.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}
