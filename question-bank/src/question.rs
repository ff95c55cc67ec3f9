//! Question and option types
//!
//! `Question` is what the store hands back; `QuestionRecord` is what the
//! ingestion side hands in. Records are validated once, at the write path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuestionBankError, Result};

/// Difficulty label applied when a record does not carry one
pub const DEFAULT_DIFFICULTY: &str = "medium";

/// Store-assigned question identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId(pub i64);

impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for QuestionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// An answer option owned by a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// A catalogued question with its options and embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub question_text: String,
    pub topic: String,
    pub difficulty: String,
    /// Computed once at write time
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Display order
    pub options: Vec<QuestionOption>,
    pub created_at: DateTime<Utc>,
}

impl Question {
    /// First option marked correct, if any
    pub fn correct_option(&self) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.is_correct)
    }
}

/// Option as delivered by the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Question as delivered by the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    #[serde(alias = "question")]
    pub question_text: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub options: Vec<OptionRecord>,
}

impl QuestionRecord {
    pub fn new(question_text: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            question_text: question_text.into(),
            topic: topic.into(),
            difficulty: None,
            options: Vec::new(),
        }
    }

    /// Append an option without explanation
    pub fn option(mut self, text: impl Into<String>, is_correct: bool) -> Self {
        self.options.push(OptionRecord {
            text: text.into(),
            is_correct,
            explanation: None,
        });
        self
    }

    /// Append a correct option carrying an explanation
    pub fn correct_option(mut self, text: impl Into<String>, explanation: impl Into<String>) -> Self {
        self.options.push(OptionRecord {
            text: text.into(),
            is_correct: true,
            explanation: Some(explanation.into()),
        });
        self
    }

    pub fn difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }

    /// Difficulty label, defaulting to `medium`
    pub fn difficulty_or_default(&self) -> &str {
        self.difficulty
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DIFFICULTY)
    }

    /// Check required fields.
    ///
    /// Zero or several correct options are accepted but logged; the
    /// synthesizer reads the first correct one.
    pub fn validate(&self) -> Result<()> {
        if self.question_text.trim().is_empty() {
            return Err(QuestionBankError::ingestion("question text is empty"));
        }
        if self.options.is_empty() {
            return Err(QuestionBankError::ingestion(format!(
                "question '{}' has no options",
                self.question_text
            )));
        }
        if let Some(pos) = self.options.iter().position(|o| o.text.trim().is_empty()) {
            return Err(QuestionBankError::ingestion(format!(
                "option {} of question '{}' is empty",
                pos, self.question_text
            )));
        }

        let correct = self.options.iter().filter(|o| o.is_correct).count();
        if correct != 1 {
            log::warn!(
                "Question '{}' has {} correct options (expected 1)",
                self.question_text,
                correct
            );
        }

        Ok(())
    }
}
