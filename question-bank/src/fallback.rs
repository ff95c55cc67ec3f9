//! Fallback answer generation
//!
//! Used only when the bank holds nothing similar to the query. The default
//! generator talks to a local Ollama server over its chat API.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{QuestionBankError, Result};

/// Generative answer provider
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer for `prompt`. `web_search` asks the provider to
    /// draw on web results where it supports that.
    fn generate(&self, prompt: &str, web_search: bool) -> Result<String>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Ollama connection settings
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server base URL (default: http://localhost:11434)
    pub host: String,
    /// Chat model (default: qwen2.5:1.5b)
    pub model: String,
    /// Transport-level timeout for one request (default: 120s)
    pub request_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5:1.5b".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Ollama `/api/chat` client
pub struct OllamaGenerator {
    agent: ureq::Agent,
    config: OllamaConfig,
}

impl OllamaGenerator {
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();

        log::info!("Fallback generator: Ollama {} at {}", config.model, config.host);
        Self { agent, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.config.host.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, web_search: bool) -> serde_json::Value {
        // Ollama has no search tool; the flag becomes an instruction
        let content = if web_search {
            format!(
                "{}\n\nDraw on current public reference material where it helps.",
                prompt
            )
        } else {
            prompt.to_string()
        };

        serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": content }],
            "stream": false,
        })
    }
}

impl AnswerGenerator for OllamaGenerator {
    fn generate(&self, prompt: &str, web_search: bool) -> Result<String> {
        let response = self
            .agent
            .post(&self.endpoint())
            .send_json(self.request_body(prompt, web_search))
            .map_err(|e| QuestionBankError::fallback(format!("Ollama request failed: {}", e)))?;

        let chat: ChatResponse = response
            .into_json()
            .map_err(|e| QuestionBankError::fallback(format!("Invalid Ollama response: {}", e)))?;

        if chat.message.content.trim().is_empty() {
            return Err(QuestionBankError::fallback("Ollama returned an empty answer"));
        }
        Ok(chat.message.content)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
