//! Question Bank CLI Entry Point
//!
//! Subcommands:
//! - ask: answer one query and print the reply
//! - ingest: load question records from a JSON or JSON-lines file
//! - list / delete: inspect and prune the bank
//! - serve: answer `{"input": ...}` lines on stdin until EOF

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use question_bank::{
    find_model_cache_dir, AnswerGenerator, EmbeddingEngine, MatcherConfig, MiniLmEmbedder,
    OllamaConfig, OllamaGenerator, QuestionId, QuestionMatcher, QuestionStore, MODELS_PATH_ENV,
};
use question_bank_cli::{load_records, serve, JsonLineTransport, DEFAULT_LOG_FILTER};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "question-bank")]
#[command(about = "Semantic matching of student questions against a question bank")]
#[command(version)]
struct Args {
    /// SQLite database holding the question bank
    #[arg(long, env = "QUESTION_BANK_DB", default_value = "questions.db", global = true)]
    db: PathBuf,

    /// Directory for downloaded embedding models
    #[arg(long, env = MODELS_PATH_ENV, global = true)]
    models_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask {
        query: String,

        #[command(flatten)]
        matching: MatchArgs,
    },
    /// Add question records from a file
    Ingest { file: PathBuf },
    /// List stored questions
    List,
    /// Delete a question and its options
    Delete { id: QuestionId },
    /// Serve JSON requests over stdio
    Serve {
        #[command(flatten)]
        matching: MatchArgs,
    },
}

#[derive(clap::Args)]
struct MatchArgs {
    /// Number of candidates to rank
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    top_k: u64,

    /// Treat candidates below this cosine similarity as no match
    #[arg(long)]
    min_similarity: Option<f32>,

    /// Reply with the no-match message instead of asking Ollama
    #[arg(long)]
    no_fallback: bool,

    /// Do not ask the fallback model to draw on web material
    #[arg(long)]
    no_web_search: bool,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    ollama_host: String,

    #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen2.5:1.5b")]
    ollama_model: String,

    /// Seconds allowed for encoding a query
    #[arg(long, default_value_t = 30)]
    embed_timeout: u64,

    /// Seconds allowed for the fallback model
    #[arg(long, default_value_t = 120)]
    fallback_timeout: u64,
}

impl MatchArgs {
    fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            top_k: self.top_k as usize,
            min_similarity: self.min_similarity,
            web_search: !self.no_web_search,
            embed_timeout: Duration::from_secs(self.embed_timeout),
            fallback_timeout: Duration::from_secs(self.fallback_timeout),
        }
    }

    fn fallback(&self) -> Option<Arc<dyn AnswerGenerator>> {
        if self.no_fallback {
            return None;
        }
        Some(Arc::new(OllamaGenerator::new(OllamaConfig {
            host: self.ollama_host.clone(),
            model: self.ollama_model.clone(),
            request_timeout: Duration::from_secs(self.fallback_timeout),
        })))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let store = Arc::new(open_store(&args)?);

    match args.command {
        Command::Ask { query, matching } => {
            let matcher = build_matcher(store, &matching)?;
            let answer = matcher.answer_question(&query).await?;
            println!("{}", answer);
        }
        Command::Ingest { file } => {
            let records = load_records(&file)?;
            let total = records.len();
            let mut failed = 0;

            for (n, record) in records.iter().enumerate() {
                match store.add_question(record) {
                    Ok(id) => tracing::debug!("Record {} stored as question {}", n + 1, id),
                    Err(e) => {
                        tracing::warn!("Record {} rejected: {}", n + 1, e);
                        failed += 1;
                    }
                }
            }

            println!("Ingested {} of {} records", total - failed, total);
            if failed > 0 {
                bail!("{} records failed to ingest", failed);
            }
        }
        Command::List => {
            for question in store.get_all_questions()? {
                println!(
                    "{}\t[{}/{}]\t{}",
                    question.id, question.topic, question.difficulty, question.question_text
                );
            }
        }
        Command::Delete { id } => {
            if !store.delete_question(id)? {
                bail!("question {} not found", id);
            }
            println!("Deleted question {}", id);
        }
        Command::Serve { matching } => {
            let matcher = build_matcher(store, &matching)?;
            tracing::info!("Serving JSON requests on stdio");

            let mut transport = JsonLineTransport::stdio();
            serve(&matcher, &mut transport).await?;
        }
    }

    Ok(())
}

fn open_store(args: &Args) -> Result<QuestionStore> {
    let cache_dir = find_model_cache_dir(args.models_path.as_deref())?;
    tracing::info!("Model cache: {:?}", cache_dir);

    let embedder = EmbeddingEngine::new(
        MiniLmEmbedder::new(&cache_dir).context("Failed to load the embedding model")?,
    );
    QuestionStore::open(&args.db, Arc::new(embedder))
        .with_context(|| format!("Failed to open question bank at {}", args.db.display()))
}

fn build_matcher(store: Arc<QuestionStore>, matching: &MatchArgs) -> Result<QuestionMatcher> {
    let matcher = QuestionMatcher::new(store, matching.matcher_config())?;
    Ok(match matching.fallback() {
        Some(generator) => matcher.with_fallback(generator),
        None => matcher,
    })
}
