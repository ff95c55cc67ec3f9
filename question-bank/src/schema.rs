//! Schema setup and migration
//!
//! The schema version lives in `PRAGMA user_version`. Version 0 with an
//! existing `questions` table is the legacy layout: embeddings stored as JSON
//! text (sometimes nested one level, `[[...]]`) and options without positions.
//! Those databases are rewritten in place to the current layout.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Deserialize;

use crate::error::{QuestionBankError, Result};
use crate::storage::encode_embedding;

/// Current schema version
pub(crate) const CURRENT_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_text TEXT NOT NULL,
    topic TEXT NOT NULL DEFAULT '',
    difficulty TEXT NOT NULL DEFAULT 'medium',
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    is_correct INTEGER NOT NULL DEFAULT 0,
    explanation TEXT
);

CREATE INDEX IF NOT EXISTS idx_options_question_position
    ON options(question_id, position);

CREATE TABLE IF NOT EXISTS bank_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const META_MODEL_KEY: &str = "embedding_model";
const META_DIMENSION_KEY: &str = "embedding_dim";

/// Bring the database up to [`CURRENT_VERSION`]
pub(crate) fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_VERSION {
        return Err(QuestionBankError::Schema(format!(
            "database schema v{} is newer than supported v{}",
            version, CURRENT_VERSION
        )));
    }

    if version == CURRENT_VERSION {
        conn.execute_batch(SCHEMA_SQL)?;
        return Ok(());
    }

    let tx = conn.transaction()?;
    if table_exists(&tx, "questions")? {
        log::warn!(
            "Database needs migration from legacy layout to v{}",
            CURRENT_VERSION
        );
        migrate_legacy(&tx)?;
    } else {
        log::debug!("Initializing schema v{}", CURRENT_VERSION);
        tx.execute_batch(SCHEMA_SQL)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;

    Ok(())
}

/// Record the embedding model on first use, reject a different one afterwards
pub(crate) fn check_model_identity(
    conn: &Connection,
    model_name: &str,
    dimension: usize,
) -> Result<()> {
    let stored_model = meta_value(conn, META_MODEL_KEY)?;
    let stored_dim = meta_value(conn, META_DIMENSION_KEY)?;

    match (stored_model, stored_dim) {
        (Some(model), Some(dim)) => {
            if model != model_name || dim != dimension.to_string() {
                return Err(QuestionBankError::ModelMismatch {
                    stored: format!("{} ({}d)", model, dim),
                    current: format!("{} ({}d)", model_name, dimension),
                });
            }
        }
        _ => {
            conn.execute(
                "INSERT OR REPLACE INTO bank_meta (key, value) VALUES (?1, ?2), (?3, ?4)",
                params![
                    META_MODEL_KEY,
                    model_name,
                    META_DIMENSION_KEY,
                    dimension.to_string()
                ],
            )?;
            log::info!("Recorded embedding model {} ({}d)", model_name, dimension);
        }
    }

    Ok(())
}

fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM bank_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Legacy embeddings were written either flat or as a single-row matrix
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyEmbedding {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl LegacyEmbedding {
    fn into_row(self, question_id: i64) -> Result<Vec<f32>> {
        match self {
            Self::Flat(row) => Ok(row),
            Self::Nested(mut rows) if rows.len() == 1 => Ok(rows.remove(0)),
            Self::Nested(rows) => Err(QuestionBankError::Schema(format!(
                "legacy question {} has a {}-row embedding",
                question_id,
                rows.len()
            ))),
        }
    }
}

struct LegacyQuestion {
    id: i64,
    question_text: String,
    topic: Option<String>,
    difficulty: Option<String>,
    embedding: Option<String>,
}

struct LegacyOption {
    question_id: i64,
    text: String,
    is_correct: bool,
    explanation: Option<String>,
}

fn migrate_legacy(tx: &Transaction<'_>) -> Result<()> {
    let has_options = table_exists(tx, "options")?;

    tx.execute_batch("ALTER TABLE questions RENAME TO legacy_questions;")?;
    if has_options {
        tx.execute_batch("ALTER TABLE options RENAME TO legacy_options;")?;
    }
    tx.execute_batch(SCHEMA_SQL)?;

    let questions = {
        let mut stmt = tx.prepare(
            "SELECT id, question_text, topic, difficulty, embedding
             FROM legacy_questions ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LegacyQuestion {
                id: row.get(0)?,
                question_text: row.get(1)?,
                topic: row.get(2)?,
                difficulty: row.get(3)?,
                embedding: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let now = chrono::Utc::now();
    for question in &questions {
        let raw = question.embedding.as_deref().ok_or_else(|| {
            QuestionBankError::Schema(format!("legacy question {} has no embedding", question.id))
        })?;
        let embedding = serde_json::from_str::<LegacyEmbedding>(raw)?.into_row(question.id)?;

        tx.execute(
            "INSERT INTO questions (id, question_text, topic, difficulty, embedding, embedding_dim, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                question.id,
                question.question_text,
                question.topic.clone().unwrap_or_default(),
                question
                    .difficulty
                    .clone()
                    .unwrap_or_else(|| crate::question::DEFAULT_DIFFICULTY.to_string()),
                encode_embedding(&embedding)?,
                embedding.len() as i64,
                now,
            ],
        )?;
    }

    let mut migrated_options = 0;
    if has_options {
        let options = {
            let mut stmt = tx.prepare(
                "SELECT question_id, text, is_correct, explanation
                 FROM legacy_options
                 WHERE question_id IS NOT NULL
                 ORDER BY question_id, COALESCE(position, id), id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(LegacyOption {
                    question_id: row.get(0)?,
                    text: row.get(1)?,
                    is_correct: row.get::<_, Option<i64>>(2)?.unwrap_or(0) != 0,
                    explanation: row.get(3)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut current: Option<i64> = None;
        let mut position = 0_i64;
        for option in &options {
            if current != Some(option.question_id) {
                current = Some(option.question_id);
                position = 0;
            }
            tx.execute(
                "INSERT INTO options (question_id, position, text, is_correct, explanation)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    option.question_id,
                    position,
                    option.text,
                    option.is_correct,
                    option.explanation
                ],
            )?;
            position += 1;
        }
        migrated_options = options.len();

        tx.execute_batch("DROP TABLE legacy_options;")?;
    }
    tx.execute_batch("DROP TABLE legacy_questions;")?;

    log::info!(
        "Migrated {} legacy questions and {} options",
        questions.len(),
        migrated_options
    );

    Ok(())
}
