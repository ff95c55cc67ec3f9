//! Query orchestration
//!
//! Encodes a query, ranks it against the current index snapshot, and either
//! formats the best match with its solution steps or hands the query to the
//! fallback generator.
//!
//! The snapshot is an immutable `Arc<SimilarityIndex>`. `refresh` builds a new
//! one from the store and swaps the pointer; queries already running keep the
//! snapshot they started with.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::{QuestionBankError, Result};
use crate::fallback::AnswerGenerator;
use crate::index::SimilarityIndex;
use crate::question::{Question, QuestionId, QuestionRecord};
use crate::solution::synthesize;
use crate::storage::QuestionStore;

/// Reply when nothing matches and no fallback is configured
pub const NO_MATCH_MESSAGE: &str = "I don't have any similar problems in my database yet.";

/// Matcher configuration
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Candidates to rank (default: 3)
    pub top_k: usize,
    /// Drop candidates scoring below this (default: none)
    pub min_similarity: Option<f32>,
    /// Ask the fallback generator to use web results (default: true)
    pub web_search: bool,
    /// Bound on the query embedding call (default: 30s)
    pub embed_timeout: Duration,
    /// Bound on the fallback generator call (default: 120s)
    pub fallback_timeout: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_similarity: None,
            web_search: true,
            embed_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(120),
        }
    }
}

impl MatcherConfig {
    /// Reject settings under which no query could ever match
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(QuestionBankError::config("top_k must be at least 1"));
        }
        if let Some(min) = self.min_similarity {
            if !(-1.0..=1.0).contains(&min) {
                return Err(QuestionBankError::config(format!(
                    "min_similarity {} is outside [-1, 1]",
                    min
                )));
            }
        }
        Ok(())
    }
}

/// Best match with its synthesized steps
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub score: f32,
    pub question: Question,
    pub steps: Vec<String>,
}

/// A further candidate, shown by question text only
#[derive(Debug, Clone)]
pub struct RankedQuestion {
    pub score: f32,
    pub question: Question,
}

/// Ranked candidates for one query
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub best: MatchResult,
    /// Remaining candidates in descending score
    pub related: Vec<RankedQuestion>,
}

/// Terminal state of a query
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(MatchReport),
    /// Nothing similar is stored; not an error
    NoMatch,
}

/// Question matcher over a store and its index snapshot
pub struct QuestionMatcher {
    store: Arc<QuestionStore>,
    embedder: Arc<dyn Embedder>,
    fallback: Option<Arc<dyn AnswerGenerator>>,
    snapshot: RwLock<Arc<SimilarityIndex>>,
    /// Serializes load-build-swap so snapshots never move backwards
    refresh_guard: Mutex<()>,
    config: MatcherConfig,
}

impl QuestionMatcher {
    /// Create a matcher and load the initial snapshot.
    ///
    /// Queries are encoded with the store's embedder so they share the
    /// stored vectors' model.
    pub fn new(store: Arc<QuestionStore>, config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        let embedder = Arc::clone(store.embedder());
        let index = SimilarityIndex::build(store.get_all_questions()?)?;
        log::info!("QuestionMatcher ready with {} questions", index.len());

        Ok(Self {
            store,
            embedder,
            fallback: None,
            snapshot: RwLock::new(Arc::new(index)),
            refresh_guard: Mutex::new(()),
            config,
        })
    }

    /// Attach the generator used when nothing matches
    pub fn with_fallback(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.fallback = Some(generator);
        self
    }

    /// Rebuild the snapshot from the store and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn refresh(&self) -> Result<usize> {
        let _guard = self.refresh_guard.lock();
        let index = Arc::new(SimilarityIndex::build(self.store.get_all_questions()?)?);
        let count = index.len();
        *self.snapshot.write() = index;

        log::info!("Similarity index refreshed: {} questions", count);
        Ok(count)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<SimilarityIndex> {
        Arc::clone(&self.snapshot.read())
    }

    /// Store a question and refresh the snapshot.
    ///
    /// Once the write commits the id is returned even if the refresh fails;
    /// the question then becomes visible on the next successful `refresh`.
    pub fn ingest(&self, record: &QuestionRecord) -> Result<QuestionId> {
        let id = self.store.add_question(record)?;
        if let Err(e) = self.refresh() {
            log::error!("Question {} stored but index refresh failed: {}", id, e);
        }
        Ok(id)
    }

    /// Rank stored questions against `query`.
    ///
    /// An empty snapshot short-circuits to `NoMatch` without encoding.
    pub async fn find_matches(&self, query: &str) -> Result<MatchOutcome> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            log::debug!("Empty question bank, no match for query");
            return Ok(MatchOutcome::NoMatch);
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let query_vector = run_bounded(
            "embedding",
            self.config.embed_timeout,
            |msg| QuestionBankError::embedding(msg),
            move || embedder.embed(&text),
        )
        .await?;

        let ranked = snapshot.top_k(&query_vector, self.config.top_k)?;
        let mut candidates = ranked
            .into_iter()
            .filter(|r| self.config.min_similarity.map_or(true, |min| r.score >= min))
            .filter_map(|r| {
                snapshot.question(r.index).map(|q| RankedQuestion {
                    score: r.score,
                    question: q.clone(),
                })
            });

        let Some(best) = candidates.next() else {
            log::debug!("No candidate passed the similarity threshold");
            return Ok(MatchOutcome::NoMatch);
        };

        log::debug!(
            "Best match: question {} (score {:.4})",
            best.question.id,
            best.score
        );

        let steps = synthesize(&best.question);
        Ok(MatchOutcome::Matched(MatchReport {
            best: MatchResult {
                score: best.score,
                question: best.question,
                steps,
            },
            related: candidates.collect(),
        }))
    }

    /// Answer a student query.
    ///
    /// A match is formatted with its options and solution steps. Without a
    /// match the fallback generator answers, or [`NO_MATCH_MESSAGE`] is
    /// returned when none is configured. Failures are returned as errors,
    /// never as answer text.
    pub async fn answer_question(&self, query: &str) -> Result<String> {
        match self.find_matches(query).await? {
            MatchOutcome::Matched(report) => Ok(format_answer(&report)),
            MatchOutcome::NoMatch => self.answer_without_match(query).await,
        }
    }

    async fn answer_without_match(&self, query: &str) -> Result<String> {
        let Some(generator) = self.fallback.clone() else {
            return Ok(NO_MATCH_MESSAGE.to_string());
        };

        log::info!("No similar question stored, asking {}", generator.name());
        let prompt = no_match_prompt(query);
        let web_search = self.config.web_search;

        run_bounded(
            "fallback",
            self.config.fallback_timeout,
            |msg| QuestionBankError::fallback(msg),
            move || generator.generate(&prompt, web_search),
        )
        .await
    }

    pub fn store(&self) -> &Arc<QuestionStore> {
        &self.store
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }
}

/// Prompt sent to the fallback generator
pub fn no_match_prompt(query: &str) -> String {
    format!(
        "I couldn't find a matching question in my database. Can you help me find an answer to this question: {}?",
        query
    )
}

/// Render a match report as the text shown to the student
pub fn format_answer(report: &MatchReport) -> String {
    let best = &report.best.question;
    let mut out = String::from("Here's a similar problem I can help you with:\n\n");

    out.push_str(&format!("Question: {}\nOptions:\n", best.question_text));
    for option in &best.options {
        let marker = if option.is_correct { "✓" } else { " " };
        out.push_str(&format!("[{}] {}\n", marker, option.text));
    }

    out.push_str("Solution Steps:\n");
    for (i, step) in report.best.steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    if !report.related.is_empty() {
        out.push_str("\nI also found other similar questions you might want to try:");
        for related in &report.related {
            out.push_str(&format!("\n- {}", related.question.question_text));
        }
    }

    out
}

/// Run a blocking provider call on the blocking pool with a time bound
async fn run_bounded<T, F>(
    stage: &'static str,
    after: Duration,
    on_panic: fn(String) -> QuestionBankError,
    task: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(after, tokio::task::spawn_blocking(task)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(on_panic(format!("{} task failed: {}", stage, join_err))),
        Err(_) => {
            log::warn!("{} call exceeded {:?}", stage, after);
            Err(QuestionBankError::Timeout { stage, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const DIM: usize = 64;
    const FRICTION: &str = "What is the force of friction?";

    fn friction_record() -> QuestionRecord {
        QuestionRecord::new(FRICTION, "Friction")
            .option("Force of friction > applied force", false)
            .option("Force of friction < applied force", true)
            .option("Force of friction = applied force", false)
            .option("There is no friction", false)
    }

    fn matcher_with(embedder: HashEmbedder, config: MatcherConfig) -> QuestionMatcher {
        let store = QuestionStore::open_in_memory(Arc::new(embedder)).unwrap();
        QuestionMatcher::new(Arc::new(store), config).unwrap()
    }

    struct ScriptedGenerator {
        reply: std::result::Result<String, String>,
        delay: Option<Duration>,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedGenerator {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                reply: Err(msg.to_string()),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl AnswerGenerator for ScriptedGenerator {
        fn generate(&self, prompt: &str, web_search: bool) -> Result<String> {
            self.seen.lock().push((prompt.to_string(), web_search));
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.reply.clone().map_err(QuestionBankError::fallback)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_exact_question_is_sole_top_match() {
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default());
        matcher.ingest(&friction_record()).unwrap();

        let MatchOutcome::Matched(report) = matcher.find_matches(FRICTION).await.unwrap() else {
            panic!("expected a match");
        };
        assert!((report.best.score - 1.0).abs() < 1e-5);
        assert_eq!(report.best.question.question_text, FRICTION);
        assert!(report.related.is_empty());
        assert_eq!(
            report.best.steps[2],
            "Correct Answer: Force of friction < applied force"
        );

        let answer = matcher.answer_question(FRICTION).await.unwrap();
        assert!(answer.starts_with("Here's a similar problem I can help you with:"));
        assert!(answer.contains("[✓] Force of friction < applied force\n"));
        assert!(answer.contains("[ ] There is no friction\n"));
        assert!(answer.contains("3. Correct Answer: Force of friction < applied force"));
        assert!(!answer.contains("I also found"));
    }

    #[tokio::test]
    async fn test_empty_store_is_no_match_without_encoding() {
        let embedder = HashEmbedder::new(DIM);
        let calls = embedder.calls();
        let matcher = matcher_with(embedder, MatcherConfig::default());

        let outcome = matcher.find_matches("anything at all").await.unwrap();
        assert!(matches!(outcome, MatchOutcome::NoMatch));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let answer = matcher.answer_question("anything at all").await.unwrap();
        assert_eq!(answer, NO_MATCH_MESSAGE);
    }

    #[tokio::test]
    async fn test_two_similar_one_dissimilar() {
        let embedder = HashEmbedder::new(4)
            .pin("Block on an incline with friction", vec![1.0, 0.1, 0.0, 0.0])
            .pin("Balance sheet for a small firm", vec![0.0, 0.0, 1.0, 0.0])
            .pin("Block on a rough incline", vec![1.0, 0.12, 0.0, 0.0])
            .pin("incline friction block", vec![1.0, 0.119, 0.0, 0.0]);
        let matcher = matcher_with(
            embedder,
            MatcherConfig {
                top_k: 2,
                ..Default::default()
            },
        );

        for text in [
            "Block on an incline with friction",
            "Balance sheet for a small firm",
            "Block on a rough incline",
        ] {
            matcher
                .ingest(&QuestionRecord::new(text, "Mixed").option("answer", true))
                .unwrap();
        }

        let MatchOutcome::Matched(report) = matcher.find_matches("incline friction block").await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(report.best.question.question_text, "Block on a rough incline");
        assert_eq!(report.related.len(), 1);
        assert_eq!(
            report.related[0].question.question_text,
            "Block on an incline with friction"
        );
        assert!(report.best.score > report.related[0].score);

        let answer = format_answer(&report);
        assert!(answer.ends_with(
            "\nI also found other similar questions you might want to try:\n- Block on an incline with friction"
        ));
    }

    #[tokio::test]
    async fn test_fallback_receives_prompt() {
        let generator = Arc::new(ScriptedGenerator::replying("Friction opposes motion."));
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default())
            .with_fallback(generator.clone());

        let answer = matcher.answer_question("Why is the sky blue").await.unwrap();
        assert_eq!(answer, "Friction opposes motion.");

        let seen = generator.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, no_match_prompt("Why is the sky blue"));
        assert!(seen[0].1);
    }

    #[tokio::test]
    async fn test_fallback_not_used_when_matched() {
        let generator = Arc::new(ScriptedGenerator::replying("unused"));
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default())
            .with_fallback(generator.clone());
        matcher.ingest(&friction_record()).unwrap();

        let answer = matcher.answer_question(FRICTION).await.unwrap();
        assert!(answer.contains("Solution Steps:"));
        assert!(generator.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_failure_is_reported() {
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default())
            .with_fallback(Arc::new(ScriptedGenerator::failing("model offline")));

        let err = matcher.answer_question("Why is the sky blue").await.unwrap_err();
        assert!(matches!(err, QuestionBankError::Fallback(_)));
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn test_fallback_timeout() {
        let generator = ScriptedGenerator {
            delay: Some(Duration::from_millis(400)),
            ..ScriptedGenerator::replying("too late")
        };
        let matcher = matcher_with(
            HashEmbedder::new(DIM),
            MatcherConfig {
                fallback_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .with_fallback(Arc::new(generator));

        let err = matcher.answer_question("Why is the sky blue").await.unwrap_err();
        assert!(matches!(
            err,
            QuestionBankError::Timeout {
                stage: "fallback",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_embedding_timeout() {
        let matcher = matcher_with(
            HashEmbedder::new(DIM).with_delay(Duration::from_millis(300)),
            MatcherConfig {
                embed_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        matcher.ingest(&friction_record()).unwrap();

        let err = matcher.answer_question(FRICTION).await.unwrap_err();
        assert!(matches!(
            err,
            QuestionBankError::Timeout {
                stage: "embedding",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_not_no_match() {
        let embedder = HashEmbedder::new(DIM).pin(FRICTION, vec![1.0; DIM]);
        let store = QuestionStore::open_in_memory(Arc::new(embedder)).unwrap();
        store.add_question(&friction_record()).unwrap();

        // Same model identity, but every query fails
        let failing = HashEmbedder::new(DIM).failing();
        let matcher = QuestionMatcher {
            embedder: Arc::new(failing),
            ..QuestionMatcher::new(Arc::new(store), MatcherConfig::default()).unwrap()
        };

        let err = matcher.answer_question(FRICTION).await.unwrap_err();
        assert!(matches!(err, QuestionBankError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_error() {
        for wrong in [DIM - 1, DIM + 1] {
            let store = QuestionStore::open_in_memory(Arc::new(HashEmbedder::new(DIM))).unwrap();
            store.add_question(&friction_record()).unwrap();

            let matcher = QuestionMatcher {
                embedder: Arc::new(HashEmbedder::new(wrong)),
                ..QuestionMatcher::new(Arc::new(store), MatcherConfig::default()).unwrap()
            };

            match matcher.answer_question(FRICTION).await {
                Err(QuestionBankError::DimensionMismatch { expected, actual }) => {
                    assert_eq!(expected, DIM);
                    assert_eq!(actual, wrong);
                }
                other => panic!("expected DimensionMismatch, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_concurrent_ingest_keeps_every_question_visible() {
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let matcher = &matcher;
                scope.spawn(move || {
                    for i in 0..25 {
                        let record = QuestionRecord::new(
                            format!("question {} from worker {}", i, worker),
                            "Load",
                        )
                        .option("answer", true);
                        let id = matcher.ingest(&record).unwrap();
                        assert!(matcher.snapshot().questions().iter().any(|q| q.id == id));
                    }
                });
            }
        });

        assert_eq!(matcher.store().count().unwrap(), 200);
        assert_eq!(matcher.snapshot().len(), 200);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(QuestionStore::open_in_memory(Arc::new(HashEmbedder::new(DIM))).unwrap());

        for config in [
            MatcherConfig {
                top_k: 0,
                ..Default::default()
            },
            MatcherConfig {
                min_similarity: Some(1.5),
                ..Default::default()
            },
            MatcherConfig {
                min_similarity: Some(f32::NAN),
                ..Default::default()
            },
        ] {
            let err = QuestionMatcher::new(Arc::clone(&store), config).err().unwrap();
            assert!(matches!(err, QuestionBankError::Config(_)));
        }
    }

    #[tokio::test]
    async fn test_threshold_turns_weak_match_into_no_match() {
        let embedder = HashEmbedder::new(2)
            .pin("stored", vec![1.0, 0.0])
            .pin("unrelated query", vec![0.0, 1.0]);
        let matcher = matcher_with(
            embedder,
            MatcherConfig {
                min_similarity: Some(0.5),
                ..Default::default()
            },
        );
        matcher
            .ingest(&QuestionRecord::new("stored", "t").option("a", true))
            .unwrap();

        let outcome = matcher.find_matches("unrelated query").await.unwrap();
        assert!(matches!(outcome, MatchOutcome::NoMatch));
        assert!(matches!(
            matcher.find_matches("stored").await.unwrap(),
            MatchOutcome::Matched(_)
        ));
    }

    #[tokio::test]
    async fn test_snapshot_isolated_until_refresh() {
        let matcher = matcher_with(HashEmbedder::new(DIM), MatcherConfig::default());
        let before = matcher.snapshot();

        matcher.store().add_question(&friction_record()).unwrap();
        assert!(matcher.snapshot().is_empty());
        assert!(matches!(
            matcher.find_matches(FRICTION).await.unwrap(),
            MatchOutcome::NoMatch
        ));

        assert_eq!(matcher.refresh().unwrap(), 1);
        assert!(before.is_empty());
        assert_eq!(matcher.snapshot().len(), 1);
        assert!(matches!(
            matcher.find_matches(FRICTION).await.unwrap(),
            MatchOutcome::Matched(_)
        ));
    }

    #[tokio::test]
    async fn test_corrupt_row_fails_refresh_and_keeps_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("questions.db");
        let store = QuestionStore::open(&db_path, Arc::new(HashEmbedder::new(DIM))).unwrap();
        let matcher = QuestionMatcher::new(Arc::new(store), MatcherConfig::default()).unwrap();
        let id = matcher.ingest(&friction_record()).unwrap();

        let raw = rusqlite::Connection::open(&db_path).unwrap();
        raw.execute(
            "UPDATE questions SET embedding = x'00' WHERE id = ?1",
            [id.0],
        )
        .unwrap();

        let err = matcher.refresh().unwrap_err();
        assert!(matches!(err, QuestionBankError::CorruptEmbedding { .. }));
        assert_eq!(matcher.snapshot().len(), 1);

        // The write commits even though the follow-up refresh fails
        let second = matcher
            .ingest(&QuestionRecord::new("What is inertia?", "Mechanics").option("resistance", true))
            .unwrap();
        assert!(second.0 > id.0);
        assert_eq!(matcher.store().count().unwrap(), 2);
        assert_eq!(matcher.snapshot().len(), 1);
    }

    #[test]
    fn test_format_answer_without_correct_option() {
        let question = Question {
            id: QuestionId(3),
            question_text: "Which is heavier?".to_string(),
            topic: "Mass".to_string(),
            difficulty: "easy".to_string(),
            embedding: vec![1.0],
            options: vec![crate::question::QuestionOption {
                text: "A kilogram of feathers".to_string(),
                is_correct: false,
                explanation: None,
            }],
            created_at: chrono::Utc::now(),
        };
        let report = MatchReport {
            best: MatchResult {
                score: 0.9,
                steps: synthesize(&question),
                question,
            },
            related: Vec::new(),
        };

        assert_eq!(
            format_answer(&report),
            "Here's a similar problem I can help you with:\n\n\
             Question: Which is heavier?\n\
             Options:\n\
             [ ] A kilogram of feathers\n\
             Solution Steps:\n\
             1. Topic: Mass\n\
             2. Question: Which is heavier?\n\
             3. Correct Answer: Not available\n"
        );
    }
}
