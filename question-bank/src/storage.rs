//! SQLite question store
//!
//! Questions and their options live in two tables linked by a cascading
//! foreign key. Each question row carries its embedding as a bincode blob,
//! computed once on write.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{QuestionBankError, Result};
use crate::question::{Question, QuestionId, QuestionOption, QuestionRecord};
use crate::schema;

/// Relational store for questions and options
///
/// Owns its connection. Every write runs in its own transaction, opened and
/// committed (or rolled back) inside a single call.
pub struct QuestionStore {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

/// Question row before its options are attached
struct QuestionRow {
    id: i64,
    question_text: String,
    topic: String,
    difficulty: String,
    embedding: Vec<u8>,
    embedding_dim: i64,
    created_at: DateTime<Utc>,
}

impl QuestionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            question_text: row.get(1)?,
            topic: row.get(2)?,
            difficulty: row.get(3)?,
            embedding: row.get(4)?,
            embedding_dim: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_question(self, options: Vec<QuestionOption>, dimension: usize) -> Result<Question> {
        if self.embedding_dim != dimension as i64 {
            return Err(QuestionBankError::corrupt_embedding(
                self.id,
                format!(
                    "recorded dimension {} differs from expected {}",
                    self.embedding_dim, dimension
                ),
            ));
        }
        let embedding = decode_embedding(self.id, &self.embedding, dimension)?;

        Ok(Question {
            id: QuestionId(self.id),
            question_text: self.question_text,
            topic: self.topic,
            difficulty: self.difficulty,
            embedding,
            options,
            created_at: self.created_at,
        })
    }
}

const SELECT_QUESTIONS: &str = "SELECT id, question_text, topic, difficulty, embedding, embedding_dim, created_at
     FROM questions";

impl QuestionStore {
    /// Open or create the store at the given SQLite path
    pub fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, embedder)?;

        log::info!("QuestionStore opened at: {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory store
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, embedder)
    }

    fn from_connection(mut conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        schema::migrate_if_needed(&mut conn)?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        schema::check_model_identity(&conn, embedder.model_name(), embedder.dimension())?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Embed and persist a question with its options.
    ///
    /// The question row and all option rows commit together. On any failure
    /// the transaction is rolled back and `Ingestion` is returned.
    pub fn add_question(&self, record: &QuestionRecord) -> Result<QuestionId> {
        self.insert_question(record).map_err(|e| match e {
            QuestionBankError::Ingestion(_) => e,
            other => QuestionBankError::ingestion(other.to_string()),
        })
    }

    fn insert_question(&self, record: &QuestionRecord) -> Result<QuestionId> {
        record.validate()?;

        let embedding = self.embedder.embed(&record.question_text)?;
        let dimension = self.embedder.dimension();
        if embedding.len() != dimension {
            return Err(QuestionBankError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
        let blob = encode_embedding(&embedding)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO questions (question_text, topic, difficulty, embedding, embedding_dim, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.question_text,
                record.topic,
                record.difficulty_or_default(),
                blob,
                dimension as i64,
                Utc::now(),
            ],
        )?;
        let question_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO options (question_id, position, text, is_correct, explanation)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, option) in record.options.iter().enumerate() {
                stmt.execute(params![
                    question_id,
                    position as i64,
                    option.text,
                    option.is_correct,
                    option.explanation,
                ])?;
            }
        }

        tx.commit()?;

        log::debug!(
            "Stored question {} with {} options",
            question_id,
            record.options.len()
        );
        Ok(QuestionId(question_id))
    }

    /// All questions ordered by id, options ordered by position.
    ///
    /// Fails as a whole if any stored embedding is unreadable; no row is
    /// ever skipped.
    pub fn get_all_questions(&self) -> Result<Vec<Question>> {
        let conn = self.conn.lock();

        let rows = {
            let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_QUESTIONS))?;
            let rows = stmt.query_map([], QuestionRow::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut options_by_question: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT question_id, text, is_correct, explanation
                 FROM options ORDER BY question_id, position",
            )?;
            let options = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    QuestionOption {
                        text: row.get(1)?,
                        is_correct: row.get(2)?,
                        explanation: row.get(3)?,
                    },
                ))
            })?;
            for option in options {
                let (question_id, option) = option?;
                options_by_question
                    .entry(question_id)
                    .or_default()
                    .push(option);
            }
        }

        let dimension = self.embedder.dimension();
        rows.into_iter()
            .map(|row| {
                let options = options_by_question.remove(&row.id).unwrap_or_default();
                row.into_question(options, dimension)
            })
            .collect()
    }

    /// Get a question by id
    pub fn get_question(&self, id: QuestionId) -> Result<Option<Question>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_QUESTIONS),
                params![id.0],
                QuestionRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let options = {
            let mut stmt = conn.prepare(
                "SELECT text, is_correct, explanation
                 FROM options WHERE question_id = ?1 ORDER BY position",
            )?;
            let options = stmt.query_map(params![id.0], |row| {
                Ok(QuestionOption {
                    text: row.get(0)?,
                    is_correct: row.get(1)?,
                    explanation: row.get(2)?,
                })
            })?;
            options.collect::<rusqlite::Result<Vec<_>>>()?
        };

        row.into_question(options, self.embedder.dimension())
            .map(Some)
    }

    /// Delete a question permanently; its options cascade
    pub fn delete_question(&self, id: QuestionId) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM questions WHERE id = ?1", params![id.0])?;
        if removed > 0 {
            log::info!("Deleted question {}", id);
        }
        Ok(removed > 0)
    }

    /// Number of stored questions
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get the embedding provider reference
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Close the underlying connection
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner();
        conn.close().map_err(|(_, e)| QuestionBankError::Storage(e))?;
        log::debug!("QuestionStore closed");
        Ok(())
    }
}

pub(crate) fn encode_embedding(vector: &[f32]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(vector)?)
}

pub(crate) fn decode_embedding(question_id: i64, blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let vector: Vec<f32> = bincode::deserialize(blob).map_err(|e| {
        QuestionBankError::corrupt_embedding(question_id, format!("undecodable blob: {}", e))
    })?;

    if vector.len() != dimension {
        return Err(QuestionBankError::corrupt_embedding(
            question_id,
            format!("expected {} values, found {}", dimension, vector.len()),
        ));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(QuestionBankError::corrupt_embedding(
            question_id,
            "non-finite values",
        ));
    }

    Ok(vector)
}
