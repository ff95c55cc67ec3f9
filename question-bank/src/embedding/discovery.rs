//! Model cache directory discovery
//!
//! Decides where fastembed keeps its downloaded model files.

use crate::error::{QuestionBankError, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the model cache location
pub const MODELS_PATH_ENV: &str = "QUESTION_BANK_MODELS_PATH";

/// Find the model cache directory with priority:
/// 1. Explicit path (CLI flag)
/// 2. QUESTION_BANK_MODELS_PATH environment variable
/// 3. User home directory (~/.question-bank/models)
///
/// The directory is created if missing.
pub fn find_model_cache_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = resolve_model_cache_dir(
        explicit,
        std::env::var_os(MODELS_PATH_ENV).map(PathBuf::from),
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from),
    )?;

    std::fs::create_dir_all(&dir)?;
    log::debug!("Model cache directory: {}", dir.display());
    Ok(dir)
}

fn resolve_model_cache_dir(
    explicit: Option<&Path>,
    env_path: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = env_path.filter(|p| !p.as_os_str().is_empty()) {
        log::info!("Using {}: {}", MODELS_PATH_ENV, path.display());
        return Ok(path);
    }

    if let Some(home) = home {
        return Ok(home.join(".question-bank").join("models"));
    }

    Err(QuestionBankError::model(format!(
        "No model cache directory. Set {} or HOME.",
        MODELS_PATH_ENV
    )))
}
