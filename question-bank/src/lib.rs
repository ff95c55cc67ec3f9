//! Question Bank
//!
//! Semantic matching of free-text student questions against a bank of
//! multiple-choice questions, with synthesized solution steps and an
//! optional generative fallback.
//!
//! ## Architecture
//!
//! ```text
//!  QuestionRecord ──► QuestionStore (SQLite) ◄── Embedder (MiniLM / custom)
//!                          │                          │
//!                   get_all_questions                 │ query vector
//!                          ▼                          ▼
//!                   SimilarityIndex ──────► QuestionMatcher ──► synthesize()
//!                   (Arc snapshot)                    │
//!                                                     └── AnswerGenerator (Ollama)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use question_bank::{
//!     find_model_cache_dir, EmbeddingEngine, MatcherConfig, MiniLmEmbedder, QuestionMatcher,
//!     QuestionRecord, QuestionStore,
//! };
//! use std::sync::Arc;
//!
//! let cache = find_model_cache_dir(None)?;
//! let embedder = Arc::new(EmbeddingEngine::new(MiniLmEmbedder::new(&cache)?));
//! let store = Arc::new(QuestionStore::open("questions.db", embedder)?);
//! let matcher = QuestionMatcher::new(store, MatcherConfig::default())?;
//!
//! matcher.ingest(
//!     &QuestionRecord::new("What is the force of friction?", "Friction")
//!         .option("Force of friction > applied force", false)
//!         .correct_option(
//!             "Force of friction < applied force",
//!             "Static friction adjusts up to its limit.",
//!         ),
//! )?;
//!
//! let answer = matcher.answer_question("What is the force of friction?").await?;
//! ```

pub mod embedding;
pub mod error;
pub mod fallback;
pub mod index;
pub mod matcher;
pub mod question;
mod schema;
pub mod solution;
pub mod storage;

pub use embedding::{
    find_model_cache_dir, Embedder, EmbeddingEngine, MiniLmEmbedder, MINILM_DIMENSION,
    MINILM_MODEL_NAME, MODELS_PATH_ENV,
};
pub use error::{QuestionBankError, Result};
pub use fallback::{AnswerGenerator, OllamaConfig, OllamaGenerator};
pub use index::{RankedIndex, SimilarityIndex};
pub use matcher::{
    format_answer, MatchOutcome, MatchReport, MatchResult, MatcherConfig, QuestionMatcher,
    RankedQuestion, NO_MATCH_MESSAGE,
};
pub use question::{OptionRecord, Question, QuestionId, QuestionOption, QuestionRecord};
pub use solution::synthesize;
pub use storage::QuestionStore;
